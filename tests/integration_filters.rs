// Integration tests for the query filters and pagination of the event
// listings.

mod fixtures;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use fixtures::helpers;

#[tokio::test]
async fn test_pagination_totals_add_up() {
    let state = helpers::test_state();
    let app = helpers::app(&state);
    let comp = helpers::seed_component(&state, "ecs", "EU-DE");
    for _ in 0..25 {
        helpers::seed_incident(&state, &[comp.clone()], 1, Utc::now() - Duration::hours(1));
    }

    let mut seen = 0;
    let mut page = 1;
    loop {
        let uri = format!("/v2/events?limit=10&page={}", page);
        let (status, response) = helpers::request(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::OK, "{response}");
        assert_eq!(response["totalRecords"].as_i64().unwrap(), 25);
        assert_eq!(response["totalPages"].as_i64().unwrap(), 3);
        assert_eq!(response["pageIndex"].as_i64().unwrap(), page);
        let count = response["data"].as_array().unwrap().len();
        seen += count;
        if page as i64 >= response["totalPages"].as_i64().unwrap() {
            break;
        }
        page += 1;
    }
    assert_eq!(seen, 25);
}

#[tokio::test]
async fn test_filter_by_type_impact_and_component() {
    let state = helpers::test_state();
    let app = helpers::app(&state);
    let a = helpers::seed_component(&state, "ecs", "EU-DE");
    let b = helpers::seed_component(&state, "evs", "EU-DE");
    helpers::seed_incident(&state, &[a.clone()], 1, Utc::now() - Duration::hours(3));
    helpers::seed_incident(&state, &[a.clone()], 2, Utc::now() - Duration::hours(2));
    helpers::seed_incident(&state, &[b.clone()], 3, Utc::now() - Duration::hours(1));

    let (status, response) =
        helpers::request(&app, "GET", "/v2/incidents?impact=2", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.as_array().unwrap().len(), 1);

    let uri = format!("/v2/incidents?components={}", b.id);
    let (status, response) = helpers::request(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.as_array().unwrap().len(), 1);
    assert_eq!(response[0]["impact"].as_i64().unwrap(), 3);

    let (status, response) =
        helpers::request(&app, "GET", "/v2/incidents?type=incident", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.as_array().unwrap().len(), 3);

    let (status, response) =
        helpers::request(&app, "GET", "/v2/incidents?type=maintenance", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_active_filter_over_http() {
    let state = helpers::test_state();
    let app = helpers::app(&state);
    let comp = helpers::seed_component(&state, "ecs", "EU-DE");
    helpers::seed_incident(&state, &[comp.clone()], 1, Utc::now() - Duration::hours(2));
    helpers::seed_closed_outage(&state, &comp);

    let (status, response) =
        helpers::request(&app, "GET", "/v2/incidents?active=true", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let list = response.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert!(list[0]["end_date"].is_null());

    // The passive case is rejected as invalid input.
    let (status, _) =
        helpers::request(&app, "GET", "/v2/incidents?active=false", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_filters_are_rejected() {
    let state = helpers::test_state();
    let app = helpers::app(&state);

    for uri in [
        "/v2/incidents?type=explosion",
        "/v2/incidents?impact=7",
        "/v2/incidents?status=unheard-of",
        "/v2/incidents?components=0",
        "/v2/incidents?components=2049",
        "/v2/incidents?start_date=2024-01-01T00:00:00Z",
        "/v2/events?limit=13",
        "/v2/events?page=0",
    ] {
        let (status, response) = helpers::request(&app, "GET", uri, None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri} -> {response}");
        assert!(response["errMsg"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn test_date_window_filter() {
    let state = helpers::test_state();
    let app = helpers::app(&state);
    let comp = helpers::seed_component(&state, "ecs", "EU-DE");
    helpers::seed_incident(&state, &[comp.clone()], 1, Utc::now() - Duration::days(10));
    helpers::seed_incident(&state, &[comp.clone()], 2, Utc::now() - Duration::hours(1));

    let start = (Utc::now() - Duration::days(1)).to_rfc3339();
    let end = Utc::now().to_rfc3339();
    let uri = format!(
        "/v2/incidents?start_date={}&end_date={}",
        urlencode(&start),
        urlencode(&end)
    );
    let (status, response) = helpers::request(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK, "{response}");
    let list = response.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["impact"].as_i64().unwrap(), 2);
}

fn urlencode(raw: &str) -> String {
    raw.replace('+', "%2B").replace(':', "%3A")
}
