//! API v2 handlers
//!
//! Components, events/incidents, extraction, availability. Mutating routes
//! sit behind the authentication and RBAC middleware; reads run the
//! tolerant claims middleware and redact `created_by` for anonymous
//! callers.
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthClaims;
use crate::availability::{component_availability, ComponentAvailability};
use crate::db::StoreError;
use crate::errors::ApiError;
use crate::event::{self, CreateEventRequest, PatchEventRequest};
use crate::rbac::Role;
use crate::types::{AppState, Component, ComponentAttribute, Event, EventUpdate, ProcessComponentResp};

use super::{
    authenticate, authorize, check_event_existence, parse_event_filter, set_jwt_claims,
    CurrentUser, EventQueryParams,
};

/// Construct the /v2 routes with their middleware stacks.
pub fn get_v2_routes(state: &AppState) -> Router<AppState> {
    let read = Router::new()
        .route("/components", get(handler_list_components))
        .route("/components/:component_id", get(handler_get_component))
        .route("/availability", get(handler_availability))
        .route("/incidents", get(handler_list_incidents))
        .route("/events", get(handler_list_events))
        .route_layer(from_fn_with_state(state.clone(), set_jwt_claims));

    let read_event = Router::new()
        .route("/incidents/:event_id", get(handler_get_event))
        .route("/events/:event_id", get(handler_get_event))
        .route_layer(from_fn_with_state(state.clone(), check_event_existence))
        .route_layer(from_fn_with_state(state.clone(), set_jwt_claims));

    let mutate = Router::new()
        .route("/components", post(handler_create_component))
        .route("/incidents", post(handler_create_event))
        .route("/events", post(handler_create_event))
        .route_layer(from_fn_with_state(state.clone(), authorize))
        .route_layer(from_fn_with_state(state.clone(), authenticate));

    let mutate_event = Router::new()
        .route("/incidents/:event_id", patch(handler_patch_event))
        .route("/events/:event_id", patch(handler_patch_event))
        .route("/events/:event_id/extract", post(handler_extract))
        .route(
            "/events/:event_id/updates/:update_id",
            patch(handler_patch_update_text),
        )
        .route_layer(from_fn_with_state(state.clone(), check_event_existence))
        .route_layer(from_fn_with_state(state.clone(), authorize))
        .route_layer(from_fn_with_state(state.clone(), authenticate));

    read.merge(read_event).merge(mutate).merge(mutate_event)
}

/// Whether the caller established an authenticated subject.
fn is_authenticated(state: &AppState, claims: &Option<Extension<AuthClaims>>) -> bool {
    state.config.authentication_disabled || claims.is_some()
}

fn redact_event(mut event: Event, authenticated: bool) -> Event {
    if !authenticated {
        event.created_by = None;
    }
    event
}

// ── Components ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateComponentRequest {
    pub name: String,
    pub attributes: Vec<ComponentAttribute>,
}

const REQUIRED_ATTRIBUTES: &[&str] = &["region", "type", "category"];

fn validate_attribute_triad(attributes: &[ComponentAttribute]) -> Result<(), ApiError> {
    if attributes.len() != REQUIRED_ATTRIBUTES.len() {
        return Err(ApiError::AttributeTriad);
    }
    for required in REQUIRED_ATTRIBUTES {
        let count = attributes
            .iter()
            .filter(|a| a.name == *required && !a.value.is_empty())
            .count();
        if count != 1 {
            return Err(ApiError::AttributeTriad);
        }
    }
    Ok(())
}

async fn handler_list_components(
    State(state): State<AppState>,
) -> Result<Json<Vec<Component>>, ApiError> {
    let components = state.store.get_components().map_err(ApiError::from_store)?;
    Ok(Json(components))
}

async fn handler_get_component(
    Path(component_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Component>, ApiError> {
    state
        .store
        .get_component(component_id)
        .map_err(ApiError::from_store)?
        .map(Json)
        .ok_or(ApiError::ComponentNotFound)
}

async fn handler_create_component(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateComponentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if user.role < Role::Admin {
        return Err(ApiError::Forbidden);
    }
    validate_attribute_triad(&request.attributes)?;
    let id = state
        .store
        .save_component(&request.name, &request.attributes)
        .map_err(ApiError::from_store)?;
    let component = state
        .store
        .get_component(id)
        .map_err(ApiError::from_store)?
        .ok_or(ApiError::ComponentNotFound)?;
    Ok((StatusCode::CREATED, Json(component)))
}

// ── Availability ───────────────────────────────────────────────

async fn handler_availability(
    State(state): State<AppState>,
) -> Result<Json<Vec<ComponentAvailability>>, ApiError> {
    let now = Utc::now();
    let pairs = state
        .store
        .get_components_with_incidents()
        .map_err(ApiError::from_store)?;
    let availability = pairs
        .iter()
        .map(|(component, events)| component_availability(component, events, now))
        .collect();
    Ok(Json(availability))
}

// ── Events ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PostEventResponse {
    pub result: Vec<ProcessComponentResp>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedEventsResponse {
    pub data: Vec<Event>,
    #[serde(rename = "pageIndex")]
    pub page_index: u32,
    #[serde(rename = "recordsPerPage")]
    pub records_per_page: u32,
    #[serde(rename = "totalRecords")]
    pub total_records: i64,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
}

async fn handler_list_incidents(
    Query(params): Query<EventQueryParams>,
    State(state): State<AppState>,
    claims: Option<Extension<AuthClaims>>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let filter = parse_event_filter(&params, false)?;
    let authenticated = is_authenticated(&state, &claims);
    let events = state
        .store
        .get_events(&filter)
        .map_err(ApiError::from_store)?
        .into_iter()
        .map(|e| redact_event(e, authenticated))
        .collect();
    Ok(Json(events))
}

async fn handler_list_events(
    Query(params): Query<EventQueryParams>,
    State(state): State<AppState>,
    claims: Option<Extension<AuthClaims>>,
) -> Result<Json<PaginatedEventsResponse>, ApiError> {
    let filter = parse_event_filter(&params, true)?;
    let authenticated = is_authenticated(&state, &claims);
    let (events, total_records) = state
        .store
        .get_events_with_count(&filter)
        .map_err(ApiError::from_store)?;
    let records_per_page = filter.limit.unwrap_or(10);
    let page_index = filter.page.unwrap_or(1);
    let total_pages = (total_records + records_per_page as i64 - 1) / records_per_page as i64;
    Ok(Json(PaginatedEventsResponse {
        data: events
            .into_iter()
            .map(|e| redact_event(e, authenticated))
            .collect(),
        page_index,
        records_per_page,
        total_records,
        total_pages,
    }))
}

async fn handler_get_event(
    State(state): State<AppState>,
    claims: Option<Extension<AuthClaims>>,
    Extension(event): Extension<Event>,
) -> Json<Event> {
    let authenticated = is_authenticated(&state, &claims);
    Json(redact_event(event, authenticated))
}

async fn handler_create_event(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateEventRequest>,
) -> Result<Json<PostEventResponse>, ApiError> {
    let actor = user.actor(&state);
    let result = event::create_event(&state.store, &request, &actor, Utc::now())?;
    Ok(Json(PostEventResponse { result }))
}

async fn handler_patch_event(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Extension(stored): Extension<Event>,
    Json(request): Json<PatchEventRequest>,
) -> Result<Json<Event>, ApiError> {
    let actor = user.actor(&state);
    let updated = event::patch_event(&state.store, &stored, &request, &actor)?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct ExtractComponentsRequest {
    pub components: Vec<i64>,
}

async fn handler_extract(
    State(state): State<AppState>,
    Extension(stored): Extension<Event>,
    Json(request): Json<ExtractComponentsRequest>,
) -> Result<Json<Event>, ApiError> {
    let extracted = event::extract_components(&state.store, &stored, &request.components)?;
    Ok(Json(extracted))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTextRequest {
    pub text: String,
}

async fn handler_patch_update_text(
    State(state): State<AppState>,
    Path(params): Path<std::collections::HashMap<String, String>>,
    Extension(stored): Extension<Event>,
    Json(request): Json<UpdateTextRequest>,
) -> Result<Json<EventUpdate>, ApiError> {
    if request.text.is_empty() {
        return Err(ApiError::InvalidInput("text must not be empty".to_string()));
    }
    let update_id: i64 = params
        .get("update_id")
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| ApiError::InvalidInput("malformed update id".to_string()))?;
    let update = state
        .store
        .modify_event_update(stored.id, update_id, &request.text)
        .map_err(|err| match err {
            StoreError::NotFound => ApiError::UpdateNotFound,
            other => ApiError::from_store(other),
        })?;
    Ok(Json(update))
}
