//! Status dashboard domain types
//!
//! Core vocabulary of the service: components, events, the per-event update
//! log, and the predicates deciding which status names are valid for which
//! event type.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::auth::AuthProvider;
use crate::config::Config;
use crate::db::Store;
use crate::rbac::RbacService;

/// Reserved status literal for update-log entries written by the engine
/// itself (component moves, closes, impact changes). Excluded from the
/// "latest user-visible status" projection.
pub const SYSTEM_STATUS: &str = "SYSTEM";

/// Open-incident statuses, in lifecycle order.
pub const INCIDENT_OPEN_STATUSES: &[&str] = &[
    "detected",
    "analysing",
    "fixing",
    "impact changed",
    "observing",
    "resolved",
];

/// Statuses accepted on an incident that already has an end date.
pub const INCIDENT_CLOSED_STATUSES: &[&str] = &["reopened", "changed"];

/// Maintenance statuses. `pending_review`/`reviewed` belong to the
/// creator-approval workflow; the reconciler treats them like `planned`.
pub const MAINTENANCE_STATUSES: &[&str] = &[
    "planned",
    "pending_review",
    "reviewed",
    "in progress",
    "modified",
    "completed",
    "cancelled",
];

/// Info event statuses.
pub const INFO_STATUSES: &[&str] = &["planned", "active", "completed", "cancelled"];

pub fn is_incident_open_status(status: &str) -> bool {
    INCIDENT_OPEN_STATUSES.contains(&status)
}

pub fn is_incident_closed_status(status: &str) -> bool {
    INCIDENT_CLOSED_STATUSES.contains(&status)
}

pub fn is_maintenance_status(status: &str) -> bool {
    MAINTENANCE_STATUSES.contains(&status)
}

pub fn is_info_status(status: &str) -> bool {
    INFO_STATUSES.contains(&status)
}

/// True when the name belongs to any status vocabulary. Used by the query
/// filter validator; `SYSTEM` is deliberately not part of any vocabulary.
pub fn is_known_status(status: &str) -> bool {
    is_incident_open_status(status)
        || is_incident_closed_status(status)
        || is_maintenance_status(status)
        || is_info_status(status)
}

/// Event type discriminator.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Incident,
    Maintenance,
    Info,
}

impl EventType {
    /// Status of the synthetic update written at creation.
    pub fn initial_status(&self) -> &'static str {
        match self {
            EventType::Incident => "detected",
            EventType::Maintenance | EventType::Info => "planned",
        }
    }

    /// Whether `status` may be written on an event of this type via PATCH.
    pub fn accepts_status(&self, status: &str) -> bool {
        match self {
            EventType::Incident => {
                is_incident_open_status(status) || is_incident_closed_status(status)
            }
            EventType::Maintenance => is_maintenance_status(status),
            EventType::Info => is_info_status(status),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventType::Incident => write!(f, "incident"),
            EventType::Maintenance => write!(f, "maintenance"),
            EventType::Info => write!(f, "info"),
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incident" => Ok(EventType::Incident),
            "maintenance" => Ok(EventType::Maintenance),
            "info" => Ok(EventType::Info),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Component attribute (key-value pair). The `{region, type, category}`
/// triad is required on every component.
#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ComponentAttribute {
    pub name: String,
    pub value: String,
}

/// A named cloud service in a specific region.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Component {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<ComponentAttribute>,
}

impl Component {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn region(&self) -> Option<&str> {
        self.attribute("region")
    }
}

/// One entry of an event's append-only status log.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EventUpdate {
    /// Row id; 0 marks an entry not yet persisted.
    #[serde(default)]
    pub id: i64,
    pub status: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl EventUpdate {
    pub fn new(status: &str, text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            status: status.to_string(),
            text: text.to_string(),
            timestamp,
        }
    }
}

/// Generalization of incident / maintenance / info.
#[derive(Clone, Debug, Serialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub impact: u8,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub system: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    pub updates: Vec<EventUpdate>,
    pub components: Vec<Component>,
}

impl Event {
    /// Status of the latest non-`SYSTEM` update, if any.
    pub fn latest_status(&self) -> Option<&str> {
        self.updates
            .iter()
            .rev()
            .find(|u| u.status != SYSTEM_STATUS)
            .map(|u| u.status.as_str())
    }

    pub fn has_update_status(&self, status: &str) -> bool {
        self.updates.iter().any(|u| u.status == status)
    }

    pub fn has_component(&self, component_id: i64) -> bool {
        self.components.iter().any(|c| c.id == component_id)
    }

    /// Active-event predicate: an incident with no end date, or a
    /// maintenance/info inside its scheduled window with no terminal status
    /// logged.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self.event_type {
            EventType::Incident => self.end_date.is_none(),
            EventType::Maintenance | EventType::Info => {
                self.start_date <= now
                    && self.end_date.map_or(true, |end| end >= now)
                    && !self.has_update_status("completed")
                    && !self.has_update_status("cancelled")
            }
        }
    }
}

/// Per-component outcome of an event creation request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessComponentResp {
    pub component_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub rbac: RbacService,
    pub auth: Arc<AuthProvider>,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> Self {
        let rbac = RbacService::from_config(&config);
        let auth = Arc::new(AuthProvider::new(config.clone()));
        Self {
            config,
            store: Arc::new(store),
            rbac,
            auth,
        }
    }
}
