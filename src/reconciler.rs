//! Background status reconciler
//!
//! Two long-lived workers (maintenance, info) wake every five minutes and
//! drive scheduled events through their status timeline from wall-clock
//! time: append `in progress`/`active` once the window opens, `completed`
//! once it closes, skipping anything already logged or cancelled. Each
//! worker bounds its scan with a watermark id so finished history is not
//! re-read forever.
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::db::{Store, StoreError};
use crate::types::{EventType, EventUpdate};

const TICK_INTERVAL: Duration = Duration::from_secs(300);

pub struct StatusReconciler {
    store: Arc<Store>,
    stop_tx: watch::Sender<bool>,
}

impl StatusReconciler {
    pub fn new(store: Arc<Store>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self { store, stop_tx }
    }

    /// Spawn the two workers. They run until [`shutdown`] is called.
    ///
    /// [`shutdown`]: StatusReconciler::shutdown
    pub fn start(&self) {
        self.spawn_worker(EventType::Maintenance);
        self.spawn_worker(EventType::Info);
    }

    fn spawn_worker(&self, kind: EventType) {
        let store = self.store.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            let mut watermark: i64 = 0;
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = run_tick(&store, kind, &mut watermark, Utc::now()) {
                            tracing::error!("{} reconciliation tick failed: {}", kind, err);
                        }
                    }
                    _ = stop_rx.changed() => {
                        tracing::debug!("{} reconciler worker stopping", kind);
                        break;
                    }
                }
            }
        });
    }

    /// Signal both workers to stop at their next select point.
    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// One reconciliation pass for one event kind. Public so tests can drive
/// ticks synchronously.
pub fn run_tick(
    store: &Store,
    kind: EventType,
    watermark: &mut i64,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let events = match kind {
        EventType::Maintenance => store.get_maintenances(*watermark)?,
        EventType::Info => store.get_info_events(*watermark)?,
        EventType::Incident => return Ok(()),
    };
    if events.is_empty() {
        return Ok(());
    }

    let mut pending_min: Option<i64> = None;
    let mut max_id = *watermark;
    for mut event in events {
        let before = event.status.clone();
        let target = reconcile_timeline(&mut event, kind, now);
        let appended = event.updates.iter().any(|u| u.id == 0);
        // A `planned` target appends nothing and must not stomp the review
        // workflow statuses, so it is never written back.
        if appended || (target != "planned" && before.as_deref() != Some(target)) {
            event.status = Some(target.to_string());
            store.modify_event(&event)?;
            tracing::debug!("{} event {} reconciled to {}", kind, event.id, target);
        }
        max_id = max_id.max(event.id);
        // Terminal events need no further scans; everything else keeps the
        // watermark low enough to be revisited.
        if target != "completed" && target != "cancelled" {
            pending_min = Some(pending_min.map_or(event.id, |min: i64| min.min(event.id)));
        }
    }
    *watermark = pending_min.unwrap_or(max_id);
    Ok(())
}

/// Derive the target status from wall-clock time and append whatever prior
/// statuses the log is missing, up to and including the target.
fn reconcile_timeline(
    event: &mut crate::types::Event,
    kind: EventType,
    now: DateTime<Utc>,
) -> &'static str {
    let running_status = match kind {
        EventType::Maintenance => "in progress",
        _ => "active",
    };
    let running_text = match kind {
        EventType::Maintenance => "Maintenance is in progress",
        _ => "Info event is active",
    };

    let target = if event.has_update_status("cancelled") {
        "cancelled"
    } else if now < event.start_date {
        "planned"
    } else if event.end_date.map_or(true, |end| now < end) {
        running_status
    } else {
        "completed"
    };

    if target == running_status || target == "completed" {
        if !event.has_update_status(running_status) {
            event
                .updates
                .push(EventUpdate::new(running_status, running_text, event.start_date));
        }
    }
    if target == "completed" && !event.has_update_status("completed") {
        let end = event.end_date.unwrap_or(now);
        event
            .updates
            .push(EventUpdate::new("completed", "Event completed", end));
    }
    target
}
