//! Per-component monthly availability
//!
//! Computes uptime percentages over the trailing twelve calendar months.
//! Only closed severity-3 incidents contribute downtime; each incident's
//! interval is clipped to the window and apportioned across the months it
//! spans.
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Component, Event, EventType};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MonthlyAvailability {
    pub year: i32,
    pub month: u32,
    pub percentage: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentAvailability {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub availability: Vec<MonthlyAvailability>,
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// Round half-up to five decimal places.
fn round5(value: f64) -> f64 {
    (value * 1e5 + 0.5).floor() / 1e5
}

/// Availability of one component over the twelve months ending at `now`,
/// newest month first.
pub fn component_availability(
    component: &Component,
    events: &[Event],
    now: DateTime<Utc>,
) -> ComponentAvailability {
    // The twelve (year, month) slots, newest first.
    let mut months: Vec<(i32, u32)> = Vec::with_capacity(12);
    let (mut year, mut month) = (now.year(), now.month());
    for _ in 0..12 {
        months.push((year, month));
        let prev = previous_month(year, month);
        year = prev.0;
        month = prev.1;
    }
    let window_start = month_start(months[11].0, months[11].1);

    let mut availability = Vec::with_capacity(12);
    for (year, month) in months {
        let slot_start = month_start(year, month);
        let (ny, nm) = next_month(year, month);
        let slot_end = month_start(ny, nm);
        let hours_in_month = (slot_end - slot_start).num_seconds() as f64 / 3600.0;

        let mut downtime_hours = 0.0;
        for event in events.iter() {
            if event.event_type != EventType::Incident || event.impact != 3 {
                continue;
            }
            let end = match event.end_date {
                Some(end) => end,
                None => continue,
            };
            if !event.has_component(component.id) {
                continue;
            }
            // Clip to the availability window, then to this month's slot.
            let start = event.start_date.max(window_start);
            let end = end.min(now);
            let overlap_start = start.max(slot_start);
            let overlap_end = end.min(slot_end);
            if overlap_end > overlap_start {
                downtime_hours += (overlap_end - overlap_start).num_seconds() as f64 / 3600.0;
            }
        }

        availability.push(MonthlyAvailability {
            year,
            month,
            percentage: round5(100.0 - downtime_hours / hours_in_month * 100.0),
        });
    }

    ComponentAvailability {
        id: component.id,
        name: component.name.clone(),
        region: component.region().map(|r| r.to_string()),
        availability,
    }
}
