//! Atom feed of recent events
//!
//! `GET /rss/?mt=<region>` renders the ten most recent events of a region,
//! `&srv=<component>` narrows to one component. Open events come first,
//! newest start date leading, then closed ones by end date.
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::EventFilter;
use crate::errors::ApiError;
use crate::types::{AppState, Event, EventType};

const FEED_LIMIT: usize = 10;

const HELP_TEXT: &str = "Status feed\n\n\
    Use ?mt=<region> for the region feed or ?mt=<region>&srv=<component> \
    for a single component feed.\n";

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub mt: Option<String>,
    pub srv: Option<String>,
}

pub fn get_feed_routes() -> Router<AppState> {
    Router::new().route("/", get(handler_feed))
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn impact_label(event: &Event) -> &'static str {
    match event.event_type {
        EventType::Maintenance => "Scheduled maintenance",
        EventType::Info => "Information",
        EventType::Incident => match event.impact {
            3 => "Service outage",
            2 => "Major incident",
            _ => "Minor incident",
        },
    }
}

/// Open events by start date descending, then closed events by end date
/// descending, capped to the feed limit.
fn sort_for_feed(mut events: Vec<Event>, now: DateTime<Utc>) -> Vec<Event> {
    let (mut open, mut closed): (Vec<Event>, Vec<Event>) =
        events.drain(..).partition(|e| e.is_active_at(now));
    open.sort_by(|a, b| b.start_date.cmp(&a.start_date));
    closed.sort_by(|a, b| {
        let a_end = a.end_date.unwrap_or(a.start_date);
        let b_end = b.end_date.unwrap_or(b.start_date);
        b_end.cmp(&a_end)
    });
    open.extend(closed);
    open.truncate(FEED_LIMIT);
    open
}

fn render_feed(title: &str, link: &str, events: &[Event], now: DateTime<Utc>) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    xml.push_str("<feed xmlns=\"http://www.w3.org/2005/Atom\">\n");
    xml.push_str(&format!("  <title>{}</title>\n", escape_xml(title)));
    xml.push_str(&format!("  <id>{}</id>\n", escape_xml(link)));
    xml.push_str(&format!("  <link href=\"{}\"/>\n", escape_xml(link)));
    xml.push_str(&format!("  <updated>{}</updated>\n", now.to_rfc3339()));

    for event in events.iter() {
        let event_link = format!("{}/events/{}", link, event.id);
        let mut content = format!("{}<br/>Start: {}", impact_label(event), event.start_date);
        if let Some(end) = event.end_date {
            content.push_str(&format!("<br/>End: {}", end));
        }
        xml.push_str("  <entry>\n");
        xml.push_str(&format!("    <title>{}</title>\n", escape_xml(&event.title)));
        xml.push_str(&format!("    <id>{}</id>\n", escape_xml(&event_link)));
        xml.push_str(&format!(
            "    <updated>{}</updated>\n",
            event.start_date.to_rfc3339()
        ));
        xml.push_str(&format!(
            "    <content type=\"html\">{}</content>\n",
            escape_xml(&content)
        ));
        xml.push_str("  </entry>\n");

        for update in event.updates.iter() {
            xml.push_str("  <entry>\n");
            xml.push_str(&format!(
                "    <title>{}</title>\n",
                escape_xml(&format!("{} - {}", event.title, update.status))
            ));
            xml.push_str(&format!(
                "    <id>{}#update-{}</id>\n",
                escape_xml(&event_link),
                update.id
            ));
            xml.push_str(&format!(
                "    <updated>{}</updated>\n",
                update.timestamp.to_rfc3339()
            ));
            xml.push_str(&format!(
                "    <content type=\"html\">{}</content>\n",
                escape_xml(&update.text)
            ));
            xml.push_str("  </entry>\n");
        }
    }
    xml.push_str("</feed>\n");
    xml
}

async fn handler_feed(
    Query(query): Query<FeedQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    if query.srv.is_some() && query.mt.is_none() {
        return Ok((StatusCode::NOT_FOUND, HELP_TEXT).into_response());
    }

    let now = Utc::now();
    let mut title = "Service status".to_string();
    let events = match (&query.mt, &query.srv) {
        (Some(region), srv) => {
            let regions = state
                .store
                .get_unique_attribute_values("region")
                .map_err(ApiError::from_store)?;
            if !regions.iter().any(|r| r == region) {
                return Ok((StatusCode::NOT_FOUND, HELP_TEXT).into_response());
            }
            match srv {
                Some(component_name) => {
                    let component = state
                        .store
                        .get_component_from_name_attrs(component_name, region)
                        .map_err(ApiError::from_store)?
                        .ok_or(ApiError::ComponentNotFound)?;
                    title = format!("{} ({}) status", component.name, region);
                    state
                        .store
                        .get_events_by_component_id(component.id, &EventFilter::default())
                        .map_err(ApiError::from_store)?
                }
                None => {
                    title = format!("{} status", region);
                    state
                        .store
                        .get_events_by_component_attr("region", region, &EventFilter::default())
                        .map_err(ApiError::from_store)?
                }
            }
        }
        (None, _) => state
            .store
            .get_events(&EventFilter::default())
            .map_err(ApiError::from_store)?,
    };

    let feed = render_feed(
        &title,
        &state.config.web_url,
        &sort_for_feed(events, now),
        now,
    );
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/atom+xml; charset=utf-8")],
        feed,
    )
        .into_response())
}
