//! Event engine
//!
//! Creation, patching, and extraction of events, including the
//! component-movement protocol that keeps the set of open incidents
//! consistent: a component reported into a new incident is moved out of the
//! incident that currently holds it, single-component incidents are closed
//! or promoted in place, and monitoring-created incidents are deduplicated
//! per (component, impact).
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::{EventFilter, Store};
use crate::errors::ApiError;
use crate::rbac::Role;
use crate::types::{
    is_incident_closed_status, Component, Event, EventType, EventUpdate, ProcessComponentResp,
};

/// Default description for monitoring-created incidents.
const SYSTEM_INCIDENT_DESCRIPTION: &str =
    "System-wide incident affecting one or multiple components. Created automatically.";

/// The caller identity the engine needs for ownership and approval checks.
#[derive(Clone, Debug)]
pub struct Actor {
    pub role: Role,
    pub subject: Option<String>,
    /// False when the authentication pipeline is disabled; maintenance
    /// approval rules are skipped then.
    pub rbac_enabled: bool,
}

impl Actor {
    pub fn unrestricted() -> Self {
        Self {
            role: Role::Admin,
            subject: None,
            rbac_enabled: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub impact: u8,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub components: Vec<i64>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub contact_email: Option<String>,
    /// Must not be supplied; the engine writes the initial update itself.
    #[serde(default)]
    pub updates: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PatchEventRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub impact: Option<u8>,
    #[serde(rename = "type", default)]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub status: String,
    pub message: String,
    pub update_date: DateTime<Utc>,
}

/// Resolve component ids against the store; any unknown id is a 400.
pub fn resolve_components(store: &Store, ids: &[i64]) -> Result<Vec<Component>, ApiError> {
    let map = store.get_components_as_map().map_err(ApiError::from_store)?;
    ids.iter()
        .map(|id| {
            map.get(id)
                .cloned()
                .ok_or(ApiError::UnknownComponentId(*id))
        })
        .collect()
}

fn status_error_for(event_type: EventType) -> ApiError {
    match event_type {
        EventType::Incident => ApiError::InvalidIncidentStatus,
        EventType::Maintenance => ApiError::InvalidMaintenanceStatus,
        EventType::Info => ApiError::InvalidInfoStatus,
    }
}

fn is_valid_email(address: &str) -> bool {
    if address.contains(char::is_whitespace) {
        return false;
    }
    let mut parts = address.splitn(2, '@');
    match (parts.next(), parts.next()) {
        (Some(local), Some(domain)) => {
            !local.is_empty() && !domain.is_empty() && domain.contains('.')
        }
        _ => false,
    }
}

fn validate_create(req: &CreateEventRequest, now: DateTime<Utc>) -> Result<(), ApiError> {
    if req.impact > 3 {
        return Err(ApiError::InvalidInput(
            "impact must be between 0 and 3".to_string(),
        ));
    }
    if req.system && req.event_type != EventType::Incident {
        return Err(ApiError::SystemCreationWrongType);
    }
    let zero_impact_kind = matches!(req.event_type, EventType::Maintenance | EventType::Info);
    if zero_impact_kind != (req.impact == 0) {
        return Err(ApiError::TypeImpactMismatch);
    }
    if req.updates.is_some() {
        return Err(ApiError::UpdatesOnCreate);
    }
    if req.components.is_empty() {
        return Err(ApiError::NoComponents);
    }
    match req.event_type {
        EventType::Incident => {
            if req.end_date.is_some() {
                return Err(ApiError::IncidentEndDateOnCreate);
            }
            if req.start_date > now {
                return Err(ApiError::IncidentFutureStart);
            }
        }
        EventType::Maintenance => {
            match req.end_date {
                Some(end) if end > req.start_date => {}
                _ => return Err(ApiError::MaintenanceDateRange),
            }
            match req.contact_email.as_deref() {
                Some(email) if is_valid_email(email) => {}
                _ => return Err(ApiError::MaintenanceContactEmail),
            }
            if req.description.as_deref().unwrap_or("").is_empty() {
                return Err(ApiError::MaintenanceDescription);
            }
            if req.start_date <= now {
                return Err(ApiError::MaintenanceStartNotFuture);
            }
        }
        EventType::Info => {}
    }
    Ok(())
}

/// Create an event and run the component-consistency protocol. Returns one
/// entry per affected component pointing at the event that now covers it.
pub fn create_event(
    store: &Store,
    req: &CreateEventRequest,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Vec<ProcessComponentResp>, ApiError> {
    validate_create(req, now)?;
    let components = resolve_components(store, &req.components)?;
    if req.system {
        create_system_event(store, req, &components, now)
    } else {
        create_user_event(store, req, actor, components, now)
    }
}

fn initial_update_text(status: &str) -> &'static str {
    match status {
        "detected" => "Incident detected",
        "pending_review" => "Maintenance submitted for review",
        _ => "Event planned",
    }
}

fn new_event_from_request(
    req: &CreateEventRequest,
    components: Vec<Component>,
    initial_status: &str,
    created_by: Option<String>,
    description: Option<String>,
    now: DateTime<Utc>,
) -> Event {
    Event {
        id: 0,
        title: req.title.clone(),
        description,
        event_type: req.event_type,
        impact: req.impact,
        start_date: req.start_date,
        end_date: req.end_date,
        status: Some(initial_status.to_string()),
        system: req.system,
        created_by,
        contact_email: req.contact_email.clone(),
        updates: vec![EventUpdate::new(
            initial_status,
            initial_update_text(initial_status),
            req.start_date.min(now),
        )],
        components,
    }
}

fn create_user_event(
    store: &Store,
    req: &CreateEventRequest,
    actor: &Actor,
    components: Vec<Component>,
    now: DateTime<Utc>,
) -> Result<Vec<ProcessComponentResp>, ApiError> {
    // A maintenance submitted by a plain creator starts in the review
    // queue instead of going straight to planned.
    let initial_status = if req.event_type == EventType::Maintenance
        && actor.rbac_enabled
        && actor.role == Role::Creator
    {
        "pending_review"
    } else {
        req.event_type.initial_status()
    };
    let created_by = if req.event_type == EventType::Maintenance {
        actor.subject.clone()
    } else {
        None
    };
    let event = new_event_from_request(
        req,
        components.clone(),
        initial_status,
        created_by,
        req.description.clone(),
        now,
    );
    let new_id = store.save_event(&event).map_err(ApiError::from_store)?;

    let mut results: Vec<ProcessComponentResp> = Vec::with_capacity(components.len());
    if req.impact == 0 || req.event_type != EventType::Incident {
        for comp in components.iter() {
            results.push(ProcessComponentResp {
                component_id: comp.id,
                event_id: Some(new_id),
                error: None,
            });
        }
        return Ok(results);
    }

    // Pull every affected component out of the incident currently holding
    // it; a source left with no other component is closed instead of
    // stripped empty.
    let active: Vec<Event> = store
        .get_events(&EventFilter::active())
        .map_err(ApiError::from_store)?
        .into_iter()
        .filter(|e| e.event_type == EventType::Incident && e.id != new_id)
        .collect();
    for comp in components.iter() {
        if let Some(holder) = active.iter().find(|inc| inc.has_component(comp.id)) {
            // Re-read the holder: an earlier iteration may have detached a
            // sibling component already.
            let holder = store
                .get_event(holder.id)
                .map_err(ApiError::from_store)?
                .ok_or(ApiError::EventNotFound)?;
            if holder.has_component(comp.id) {
                let close_src = holder.components.len() == 1;
                store
                    .move_component_between_events(comp, &holder, new_id, close_src)
                    .map_err(ApiError::from_store)?;
            }
        }
        results.push(ProcessComponentResp {
            component_id: comp.id,
            event_id: Some(new_id),
            error: None,
        });
    }
    Ok(results)
}

fn find_open_system_incident(store: &Store, impact: u8) -> Result<Option<Event>, ApiError> {
    let filter = EventFilter {
        types: vec![EventType::Incident],
        is_active: Some(true),
        system: Some(true),
        impact: Some(impact),
        ..Default::default()
    };
    Ok(store
        .get_events(&filter)
        .map_err(ApiError::from_store)?
        .into_iter()
        .next())
}

fn create_system_event(
    store: &Store,
    req: &CreateEventRequest,
    components: &[Component],
    now: DateTime<Utc>,
) -> Result<Vec<ProcessComponentResp>, ApiError> {
    let description = req
        .description
        .clone()
        .unwrap_or_else(|| SYSTEM_INCIDENT_DESCRIPTION.to_string());
    let mut results: Vec<ProcessComponentResp> = Vec::with_capacity(components.len());

    for comp in components.iter() {
        let touching = store
            .get_events_by_component_id(
                comp.id,
                &EventFilter {
                    types: vec![EventType::Incident, EventType::Maintenance],
                    is_active: Some(true),
                    ..Default::default()
                },
            )
            .map_err(ApiError::from_store)?;

        // A maintenance window on the component suppresses ingestion.
        if touching
            .iter()
            .any(|e| e.event_type == EventType::Maintenance)
        {
            results.push(ProcessComponentResp {
                component_id: comp.id,
                event_id: None,
                error: Some(ApiError::MaintenanceExists.to_string()),
            });
            continue;
        }

        let incident = touching
            .into_iter()
            .find(|e| e.event_type == EventType::Incident);
        let resolved_event_id = match incident {
            None => match find_open_system_incident(store, req.impact)? {
                Some(open) => {
                    store
                        .add_component_to_event(open.id, comp)
                        .map_err(ApiError::from_store)?;
                    open.id
                }
                None => {
                    let event = new_event_from_request(
                        req,
                        vec![comp.clone()],
                        req.event_type.initial_status(),
                        None,
                        Some(description.clone()),
                        now,
                    );
                    store.save_event(&event).map_err(ApiError::from_store)?
                }
            },
            // A human-opened incident wins over the monitoring report.
            Some(inc) if !inc.system => inc.id,
            Some(inc) if inc.impact >= req.impact => inc.id,
            Some(inc) => {
                if inc.components.len() == 1 {
                    store
                        .increase_incident_impact(&inc, req.impact)
                        .map_err(ApiError::from_store)?;
                    inc.id
                } else if let Some(peer) = find_open_system_incident(store, req.impact)? {
                    store
                        .move_component_between_events(comp, &inc, peer.id, false)
                        .map_err(ApiError::from_store)?;
                    peer.id
                } else {
                    let extracted = store
                        .extract_components_to_new_event(
                            &[comp.clone()],
                            &inc,
                            req.impact,
                            &req.title,
                            Some(description.as_str()),
                        )
                        .map_err(ApiError::from_store)?;
                    extracted.id
                }
            }
        };
        results.push(ProcessComponentResp {
            component_id: comp.id,
            event_id: Some(resolved_event_id),
            error: None,
        });
    }
    Ok(results)
}

fn check_maintenance_rbac(
    stored: &Event,
    req: &PatchEventRequest,
    actor: &Actor,
) -> Result<(), ApiError> {
    if !actor.rbac_enabled {
        return Ok(());
    }
    let stored_status = stored.status.as_deref().unwrap_or_default();
    match actor.role {
        Role::Admin => Ok(()),
        Role::Operator => {
            let allowed = (req.status == "reviewed" && stored_status == "pending_review")
                || req.status == "cancelled"
                || (req.status == "pending_review" && stored_status == "pending_review");
            if allowed {
                Ok(())
            } else {
                Err(ApiError::Forbidden)
            }
        }
        Role::Creator => {
            let owner = actor.subject.is_some() && stored.created_by == actor.subject;
            let allowed = stored_status == "pending_review"
                && owner
                && matches!(req.status.as_str(), "pending_review" | "modified" | "cancelled");
            if allowed {
                Ok(())
            } else {
                Err(ApiError::Forbidden)
            }
        }
        Role::NoRole => Err(ApiError::Forbidden),
    }
}

/// Validate and apply a PATCH to a stored event; appends the new update and
/// returns the refreshed event.
pub fn patch_event(
    store: &Store,
    stored: &Event,
    req: &PatchEventRequest,
    actor: &Actor,
) -> Result<Event, ApiError> {
    if stored.event_type == EventType::Incident
        && stored.end_date.is_none()
        && req.impact == Some(0)
    {
        return Err(ApiError::ImpactToZero);
    }
    let effective_type = req.event_type.unwrap_or(stored.event_type);
    let effective_impact = req.impact.unwrap_or(stored.impact);
    if effective_impact > 3 {
        return Err(ApiError::InvalidInput(
            "impact must be between 0 and 3".to_string(),
        ));
    }
    let zero_impact_kind = matches!(effective_type, EventType::Maintenance | EventType::Info);
    if zero_impact_kind != (effective_impact == 0) {
        return Err(ApiError::TypeImpactMismatch);
    }
    if !stored.event_type.accepts_status(&req.status) {
        return Err(status_error_for(stored.event_type));
    }

    match stored.event_type {
        EventType::Incident => {
            let closed = stored.end_date.is_some();
            if closed {
                if !is_incident_closed_status(&req.status) {
                    return Err(ApiError::ClosedIncidentStatus);
                }
                if (req.start_date.is_some() || req.end_date.is_some())
                    && req.status != "changed"
                {
                    return Err(ApiError::InvalidInput(
                        "dates of a closed incident can only change under the changed status"
                            .to_string(),
                    ));
                }
            } else {
                if req.impact.is_some()
                    && req.impact != Some(stored.impact)
                    && req.status != "impact changed"
                {
                    return Err(ApiError::ImpactChangeStatus);
                }
                if req.start_date.is_some() {
                    return Err(ApiError::OpenIncidentStartDate);
                }
            }
        }
        EventType::Maintenance => check_maintenance_rbac(stored, req, actor)?,
        EventType::Info => {}
    }

    let mut event = stored.clone();
    if let Some(title) = &req.title {
        event.title = title.clone();
    }
    if let Some(description) = &req.description {
        event.description = Some(description.clone());
    }
    event.event_type = effective_type;
    event.impact = effective_impact;
    if let Some(start) = req.start_date {
        event.start_date = start;
    }
    if let Some(end) = req.end_date {
        event.end_date = Some(end);
    }
    event
        .updates
        .push(EventUpdate::new(&req.status, &req.message, req.update_date));
    event.status = Some(req.status.clone());

    if req.status == "resolved" {
        event.end_date = Some(req.update_date);
    }
    if req.status == "reopened" {
        store.reopen_event(event.id).map_err(ApiError::from_store)?;
        event.end_date = None;
    }
    store.modify_event(&event).map_err(ApiError::from_store)?;
    store
        .get_event(event.id)
        .map_err(ApiError::from_store)?
        .ok_or(ApiError::EventNotFound)
}

/// Split the requested components off an event into a new incident carrying
/// the source's impact, title and description.
pub fn extract_components(
    store: &Store,
    src: &Event,
    component_ids: &[i64],
) -> Result<Event, ApiError> {
    if component_ids.is_empty() {
        return Err(ApiError::InvalidInput(
            "at least one component is required".to_string(),
        ));
    }
    let mut comps: Vec<Component> = Vec::new();
    for id in component_ids.iter() {
        let comp = src
            .components
            .iter()
            .find(|c| c.id == *id)
            .ok_or(ApiError::ComponentNotAttached)?;
        if !comps.iter().any(|c| c.id == comp.id) {
            comps.push(comp.clone());
        }
    }
    if comps.len() >= src.components.len() {
        return Err(ApiError::ExtractAllComponents);
    }
    store
        .extract_components_to_new_event(
            &comps,
            src,
            src.impact,
            &src.title,
            src.description.as_deref(),
        )
        .map_err(ApiError::from_store)
}
