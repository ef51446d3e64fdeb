//! Legacy API v1
//!
//! The original monitoring ingestion surface. `GET /v1/component_status`
//! lists components with their open incidents; `POST /v1/component_status`
//! reports impact on one component and answers 409 when an open incident of
//! equal or higher impact already covers it. Superseded by the v2 system
//! path but kept behaviorally separate.
use axum::{
    extract::State,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::EventFilter;
use crate::errors::ApiError;
use crate::types::{AppState, ComponentAttribute, Event, EventType, EventUpdate};

use super::{authenticate, authorize, CurrentUser};

/// Construct the /v1 routes.
pub fn get_v1_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/component_status",
            get(handler_list_component_status).post(handler_post_component_status),
        )
        .route_layer(from_fn_with_state(state.clone(), authorize))
        .route_layer(from_fn_with_state(state.clone(), authenticate))
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub id: i64,
    pub name: String,
    pub attributes: Vec<ComponentAttribute>,
    pub incidents: Vec<Event>,
}

/// Report of one component's impact as submitted by the monitoring system.
#[derive(Debug, Deserialize)]
pub struct ComponentStatusPost {
    pub name: String,
    pub impact: u8,
    pub attributes: Vec<ComponentAttribute>,
}

async fn handler_list_component_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<ComponentStatus>>, ApiError> {
    let now = Utc::now();
    let pairs = state
        .store
        .get_components_with_incidents()
        .map_err(ApiError::from_store)?;
    let statuses = pairs
        .into_iter()
        .map(|(component, events)| ComponentStatus {
            id: component.id,
            name: component.name,
            attributes: component.attributes,
            incidents: events
                .into_iter()
                .filter(|e| e.is_active_at(now))
                .collect(),
        })
        .collect();
    Ok(Json(statuses))
}

async fn handler_post_component_status(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
    Json(request): Json<ComponentStatusPost>,
) -> Result<impl IntoResponse, ApiError> {
    if request.impact < 1 || request.impact > 3 {
        return Err(ApiError::InvalidInput(
            "impact must be between 1 and 3".to_string(),
        ));
    }
    let region = request
        .attributes
        .iter()
        .find(|a| a.name == "region")
        .map(|a| a.value.as_str())
        .ok_or_else(|| ApiError::InvalidInput("region attribute is required".to_string()))?;
    let component = state
        .store
        .get_component_from_name_attrs(&request.name, region)
        .map_err(ApiError::from_store)?
        .ok_or(ApiError::ComponentNotFound)?;

    let open = state
        .store
        .get_events_by_component_id(
            component.id,
            &EventFilter {
                types: vec![EventType::Incident],
                is_active: Some(true),
                ..Default::default()
            },
        )
        .map_err(ApiError::from_store)?;
    if open.iter().any(|e| e.impact >= request.impact) {
        return Err(ApiError::DuplicateImpact);
    }

    // Attach to an open system incident of this impact if one exists,
    // otherwise open a fresh one.
    let matching = state
        .store
        .get_events(&EventFilter {
            types: vec![EventType::Incident],
            is_active: Some(true),
            system: Some(true),
            impact: Some(request.impact),
            ..Default::default()
        })
        .map_err(ApiError::from_store)?;
    let event_id = match matching.into_iter().next() {
        Some(open) => {
            state
                .store
                .add_component_to_event(open.id, &component)
                .map_err(ApiError::from_store)?;
            open.id
        }
        None => {
            let now = Utc::now();
            let event = Event {
                id: 0,
                title: format!("{} incident", component.name),
                description: None,
                event_type: EventType::Incident,
                impact: request.impact,
                start_date: now,
                end_date: None,
                status: Some("detected".to_string()),
                system: true,
                created_by: None,
                contact_email: None,
                updates: vec![EventUpdate::new("detected", "Incident detected", now)],
                components: vec![component.clone()],
            };
            state.store.save_event(&event).map_err(ApiError::from_store)?
        }
    };
    let event = state
        .store
        .get_event(event_id)
        .map_err(ApiError::from_store)?
        .ok_or(ApiError::EventNotFound)?;
    Ok(Json(event))
}
