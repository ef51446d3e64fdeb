// Integration tests for the component surface: creation with the required
// attribute triad, duplicate rejection, lookups, and the legacy v1 path.

mod fixtures;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use fixtures::helpers;
use serde_json::json;

fn component_body(name: &str, region: &str) -> serde_json::Value {
    json!({
        "name": name,
        "attributes": [
            {"name": "region", "value": region},
            {"name": "type", "value": "block-storage"},
            {"name": "category", "value": "storage"}
        ]
    })
}

#[tokio::test]
async fn test_create_component_and_lookup() {
    let state = helpers::test_state();
    let app = helpers::app(&state);

    let (status, response) = helpers::request(
        &app,
        "POST",
        "/v2/components",
        None,
        Some(component_body("evs", "EU-DE")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{response}");
    let id = response["id"].as_i64().unwrap();
    assert_eq!(response["name"], "evs");
    assert_eq!(response["attributes"].as_array().unwrap().len(), 3);

    let (status, response) =
        helpers::request(&app, "GET", &format!("/v2/components/{}", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["name"], "evs");

    let (status, response) = helpers::request(&app, "GET", "/v2/components", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.as_array().unwrap().len(), 1);

    let (status, _) = helpers::request(&app, "GET", "/v2/components/999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_component_rejects_duplicates_and_bad_triads() {
    let state = helpers::test_state();
    let app = helpers::app(&state);

    let (status, _) = helpers::request(
        &app,
        "POST",
        "/v2/components",
        None,
        Some(component_body("evs", "EU-DE")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Same (name, region) pair.
    let (status, response) = helpers::request(
        &app,
        "POST",
        "/v2/components",
        None,
        Some(component_body("evs", "EU-DE")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["errMsg"], "component already exists");

    // Same name, different region, is a new component.
    let (status, _) = helpers::request(
        &app,
        "POST",
        "/v2/components",
        None,
        Some(component_body("evs", "EU-NL")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Triad violations.
    for attributes in [
        json!([{"name": "region", "value": "EU-DE"}]),
        json!([
            {"name": "region", "value": "EU-DE"},
            {"name": "region", "value": "EU-NL"},
            {"name": "category", "value": "storage"}
        ]),
        json!([
            {"name": "region", "value": "EU-DE"},
            {"name": "type", "value": "x"},
            {"name": "tier", "value": "gold"}
        ]),
    ] {
        let (status, _) = helpers::request(
            &app,
            "POST",
            "/v2/components",
            None,
            Some(json!({"name": "dns", "attributes": attributes})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_v1_component_status_conflict_semantics() {
    let state = helpers::test_state();
    let app = helpers::app(&state);
    let comp = helpers::seed_component(&state, "ecs", "EU-DE");

    let report = |impact: u8| {
        json!({
            "name": "ecs",
            "impact": impact,
            "attributes": [{"name": "region", "value": "EU-DE"}]
        })
    };

    // First report opens a system incident.
    let (status, response) =
        helpers::request(&app, "POST", "/v1/component_status", None, Some(report(2))).await;
    assert_eq!(status, StatusCode::OK, "{response}");
    let event_id = response["id"].as_i64().unwrap();
    let event = state.store.get_event(event_id).unwrap().unwrap();
    assert!(event.system);
    assert_eq!(event.impact, 2);
    assert!(event.has_component(comp.id));

    // Equal impact conflicts.
    let (status, _) =
        helpers::request(&app, "POST", "/v1/component_status", None, Some(report(2))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Lower impact also conflicts (an equal-or-higher incident exists).
    let (status, _) =
        helpers::request(&app, "POST", "/v1/component_status", None, Some(report(1))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Higher impact opens a new incident.
    let (status, response) =
        helpers::request(&app, "POST", "/v1/component_status", None, Some(report(3))).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(response["id"].as_i64().unwrap(), event_id);

    // Unknown component is a 404.
    let unknown = json!({
        "name": "nope",
        "impact": 2,
        "attributes": [{"name": "region", "value": "EU-DE"}]
    });
    let (status, _) =
        helpers::request(&app, "POST", "/v1/component_status", None, Some(unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_v1_component_status_listing_carries_open_incidents() {
    let state = helpers::test_state();
    let app = helpers::app(&state);
    let comp = helpers::seed_component(&state, "ecs", "EU-DE");
    helpers::seed_incident(&state, &[comp.clone()], 2, Utc::now() - Duration::hours(1));
    // A closed outage does not show up.
    helpers::seed_closed_outage(&state, &comp);

    let (status, response) =
        helpers::request(&app, "GET", "/v1/component_status", None, None).await;
    assert_eq!(status, StatusCode::OK, "{response}");
    let list = response.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "ecs");
    assert_eq!(list[0]["incidents"].as_array().unwrap().len(), 1);
    assert_eq!(list[0]["incidents"][0]["impact"].as_i64().unwrap(), 2);
}
