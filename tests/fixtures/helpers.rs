// Test helper functions shared by the integration suites

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::SignWithKey;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::BTreeMap;
use tower::ServiceExt;

use status_dashboard::api;
use status_dashboard::config::Config;
use status_dashboard::db::Store;
use status_dashboard::types::{AppState, Component, ComponentAttribute, Event, EventType, EventUpdate};

/// State over an in-memory store with the auth pipeline disabled.
pub fn test_state() -> AppState {
    let mut config = Config::default();
    config.authentication_disabled = true;
    state_with_config(config)
}

/// State with HS256 authentication and the three role groups configured.
pub fn test_state_with_auth(secret: &str) -> AppState {
    let mut config = Config::default();
    config.secret_key = secret.to_string();
    config.group_creators = Some("creators".to_string());
    config.group_operators = Some("operators".to_string());
    config.group_admins = Some("admins".to_string());
    state_with_config(config)
}

pub fn state_with_config(config: Config) -> AppState {
    let store = Store::in_memory().expect("in-memory store");
    store.migrate().expect("migrations");
    AppState::new(config, store)
}

pub fn app(state: &AppState) -> Router {
    api::build_router(state.clone())
}

/// Sign an HS256 token the way the monitoring clients do.
pub fn hmac_token(secret: &str, sub: &str, groups: &[&str]) -> String {
    let key: Hmac<Sha256> = Hmac::new_from_slice(secret.as_bytes()).unwrap();
    let mut claims: BTreeMap<String, Value> = BTreeMap::new();
    claims.insert("sub".to_string(), json!(sub));
    claims.insert("groups".to_string(), json!(groups));
    claims.sign_with_key(&key).unwrap()
}

/// Drive one request through the router and return status plus parsed body.
pub async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = ServiceExt::<Request<Body>>::oneshot(app.clone(), request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };
    (status, value)
}

/// Raw body variant for non-JSON responses (the feed).
pub async fn request_raw(app: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = ServiceExt::<Request<Body>>::oneshot(app.clone(), request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

pub fn seed_component(state: &AppState, name: &str, region: &str) -> Component {
    let attrs = vec![
        ComponentAttribute {
            name: "region".into(),
            value: region.into(),
        },
        ComponentAttribute {
            name: "type".into(),
            value: "compute".into(),
        },
        ComponentAttribute {
            name: "category".into(),
            value: "compute".into(),
        },
    ];
    let id = state.store.save_component(name, &attrs).expect("component");
    state.store.get_component(id).unwrap().unwrap()
}

/// Seed an open incident directly through the store.
pub fn seed_incident(
    state: &AppState,
    components: &[Component],
    impact: u8,
    start: DateTime<Utc>,
) -> i64 {
    let event = Event {
        id: 0,
        title: "Seeded incident".into(),
        description: None,
        event_type: EventType::Incident,
        impact,
        start_date: start,
        end_date: None,
        status: Some("detected".into()),
        system: false,
        created_by: None,
        contact_email: None,
        updates: vec![EventUpdate::new("detected", "Incident detected", start)],
        components: components.to_vec(),
    };
    state.store.save_event(&event).expect("seed incident")
}

/// A one hour severity-3 outage ending in the recent past.
pub fn seed_closed_outage(state: &AppState, component: &Component) -> i64 {
    let end = Utc::now() - Duration::hours(1);
    let start = end - Duration::hours(1);
    let event = Event {
        id: 0,
        title: "Outage".into(),
        description: None,
        event_type: EventType::Incident,
        impact: 3,
        start_date: start,
        end_date: Some(end),
        status: Some("resolved".into()),
        system: false,
        created_by: None,
        contact_email: None,
        updates: vec![EventUpdate::new("detected", "Outage detected", start)],
        components: vec![component.clone()],
    };
    state.store.save_event(&event).expect("seed outage")
}
