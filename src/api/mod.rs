//! HTTP pipeline
//!
//! Router assembly and the middleware chain on mutating routes:
//! authentication (bearer token), RBAC resolution, event existence. Read
//! routes run the tolerant claims middleware instead so anonymous callers
//! still get responses, with `created_by` redacted.
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestId, RequestId};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::ServiceBuilderExt;
use uuid::Uuid;

use crate::auth::{self, AuthClaims};
use crate::db::EventFilter;
use crate::errors::ApiError;
use crate::event::Actor;
use crate::feed;
use crate::rbac::Role;
use crate::types::{is_known_status, AppState, EventType};

pub mod v1;
pub mod v2;

/// Authenticated caller as resolved by the RBAC middleware.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub role: Role,
    pub sub: Option<String>,
}

impl CurrentUser {
    pub fn actor(&self, state: &AppState) -> Actor {
        Actor {
            role: self.role,
            subject: self.sub.clone(),
            rbac_enabled: !state.config.authentication_disabled,
        }
    }
}

// A `MakeRequestId` that tags every request with a fresh UUID
#[derive(Clone, Default)]
struct ApiMakeRequestId {}

impl MakeRequestId for ApiMakeRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let req_id = Uuid::new_v4().simple().to_string();

        Some(RequestId::new(
            http::HeaderValue::from_str(req_id.as_str()).unwrap(),
        ))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.to_string())
}

/// Reject requests without a valid bearer token; parsed claims land in the
/// request extensions. With authentication disabled the caller is treated
/// as an administrator.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, ApiError> {
    if state.config.authentication_disabled {
        req.extensions_mut().insert(CurrentUser {
            role: Role::Admin,
            sub: None,
        });
        return Ok(next.run(req).await);
    }
    let token = bearer_token(req.headers()).ok_or(ApiError::Unauthorized)?;
    let claims = state.auth.validate_token(&token).await?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Resolve the caller's role from the groups claim. HMAC-authenticated
/// machine callers are implicitly administrators.
pub async fn authorize(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, ApiError> {
    if req.extensions().get::<CurrentUser>().is_some() {
        // Authentication is disabled; the admin identity is already set.
        return Ok(next.run(req).await);
    }
    let claims = req
        .extensions()
        .get::<AuthClaims>()
        .cloned()
        .ok_or(ApiError::Unauthorized)?;
    let user = if claims.hmac {
        CurrentUser {
            role: Role::Admin,
            sub: claims.subject(),
        }
    } else {
        let groups = claims.groups();
        if !state.rbac.has_any_configured_group(&groups) {
            return Err(ApiError::Unauthorized);
        }
        CurrentUser {
            role: state.rbac.resolve(&groups),
            sub: claims.subject(),
        }
    };
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Tolerant variant for read routes: parse the token when present, never
/// reject. Downstream handlers redact `created_by` when no subject is
/// established.
pub async fn set_jwt_claims(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next<Body>,
) -> Response {
    if let Some(token) = bearer_token(req.headers()) {
        if let Ok(claims) = state.auth.validate_token(&token).await {
            req.extensions_mut().insert(claims);
        }
    }
    next.run(req).await
}

/// Load the event named in the URI into the request extensions; 404 when it
/// does not exist.
pub async fn check_event_existence(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, ApiError> {
    let event_id: i64 = params
        .get("event_id")
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| ApiError::InvalidInput("malformed event id".to_string()))?;
    let event = state
        .store
        .get_event(event_id)
        .map_err(ApiError::from_store)?
        .ok_or(ApiError::EventNotFound)?;
    req.extensions_mut().insert(event);
    Ok(next.run(req).await)
}

// ── Query filters ──────────────────────────────────────────────

/// Raw query parameters of the event listing endpoints, validated into an
/// [`EventFilter`].
#[derive(Debug, Default, Deserialize)]
pub struct EventQueryParams {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub active: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub impact: Option<String>,
    pub system: Option<String>,
    pub components: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

const MAX_COMPONENT_ID: i64 = 2048;

fn parse_date(raw: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ApiError::InvalidInput(format!("{} is not a valid RFC3339 date", field)))
}

pub fn parse_event_filter(
    params: &EventQueryParams,
    allow_pagination: bool,
) -> Result<EventFilter, ApiError> {
    let mut filter = EventFilter::default();

    if let Some(types) = &params.event_type {
        for part in types.split(',') {
            let event_type: EventType = part.trim().parse().map_err(ApiError::InvalidInput)?;
            filter.types.push(event_type);
        }
    }
    if let Some(active) = &params.active {
        match active.parse::<bool>() {
            Ok(true) => filter.is_active = Some(true),
            _ => {
                return Err(ApiError::InvalidInput(
                    "only active=true is a valid filter".to_string(),
                ))
            }
        }
    }
    if let Some(status) = &params.status {
        if !is_known_status(status) {
            return Err(ApiError::InvalidInput(format!(
                "unknown status: {}",
                status
            )));
        }
        filter.status = Some(status.clone());
    }
    match (&params.start_date, &params.end_date) {
        (Some(start), Some(end)) => {
            let start = parse_date(start, "start_date")?;
            let end = parse_date(end, "end_date")?;
            if end < start {
                return Err(ApiError::InvalidInput(
                    "end_date must not precede start_date".to_string(),
                ));
            }
            filter.start_date = Some(start);
            filter.end_date = Some(end);
        }
        (None, None) => {}
        _ => {
            return Err(ApiError::InvalidInput(
                "start_date and end_date must be supplied together".to_string(),
            ))
        }
    }
    if let Some(impact) = &params.impact {
        let impact: u8 = impact
            .parse()
            .map_err(|_| ApiError::InvalidInput("impact must be an integer".to_string()))?;
        if impact > 3 {
            return Err(ApiError::InvalidInput(
                "impact must be between 0 and 3".to_string(),
            ));
        }
        filter.impact = Some(impact);
    }
    if let Some(system) = &params.system {
        filter.system = Some(system.parse::<bool>().map_err(|_| {
            ApiError::InvalidInput("system must be true or false".to_string())
        })?);
    }
    if let Some(components) = &params.components {
        for part in components.split(',') {
            let id: i64 = part.trim().parse().map_err(|_| {
                ApiError::InvalidInput("components must be a comma list of ids".to_string())
            })?;
            if id <= 0 || id > MAX_COMPONENT_ID {
                return Err(ApiError::InvalidInput(format!(
                    "component id {} out of range",
                    id
                )));
            }
            filter.component_ids.push(id);
        }
    }
    if allow_pagination {
        if let Some(page) = &params.page {
            let page: u32 = page
                .parse()
                .map_err(|_| ApiError::InvalidInput("page must be an integer".to_string()))?;
            if page < 1 {
                return Err(ApiError::InvalidInput("page must be at least 1".to_string()));
            }
            filter.page = Some(page);
        }
        if let Some(limit) = &params.limit {
            let limit: u32 = limit
                .parse()
                .map_err(|_| ApiError::InvalidInput("limit must be an integer".to_string()))?;
            if ![10, 20, 50].contains(&limit) {
                return Err(ApiError::InvalidInput(
                    "limit must be one of 10, 20, 50".to_string(),
                ));
            }
            filter.limit = Some(limit);
        }
    }
    Ok(filter)
}

// ── Router assembly ────────────────────────────────────────────

/// Return 404 error with the error envelope
async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"errMsg": "not found"})))
}

/// Assemble the full application router with the shared layers.
pub fn build_router(state: AppState) -> Router {
    let cors = match state.config.web_url.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => CorsLayer::permissive(),
    };

    Router::new()
        .nest("/auth", auth::get_auth_routes())
        .nest("/v1", v1::get_v1_routes(&state))
        .nest("/v2", v2::get_v2_routes(&state))
        .nest("/rss", feed::get_feed_routes())
        .fallback(handler_404)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .set_x_request_id(ApiMakeRequestId::default())
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().include_headers(true))
                        .on_response(DefaultOnResponse::new().include_headers(true)),
                )
                .layer(cors),
        )
}
