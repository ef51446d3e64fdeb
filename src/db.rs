//! SQLite persistence gateway.
//!
//! Only this module talks to the database. The engine, the reconciler and
//! the HTTP handlers call store methods; they never execute SQL directly.
//! Multi-step mutations (component moves, extraction, impact promotion) each
//! run inside a single transaction.
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::types::{
    Component, ComponentAttribute, Event, EventType, EventUpdate, SYSTEM_STATUS,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error("component already exists")]
    ComponentExists,

    #[error("row not found")]
    NotFound,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter over the event table; assembled by the API layer, translated to
/// SQL here.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub types: Vec<EventType>,
    pub is_active: Option<bool>,
    pub status: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub impact: Option<u8>,
    pub system: Option<bool>,
    pub component_ids: Vec<i64>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl EventFilter {
    pub fn active() -> Self {
        EventFilter {
            is_active: Some(true),
            ..Default::default()
        }
    }
}

/// The one timestamp format stored in the database. Writing and comparing
/// through the same formatter keeps SQL string comparisons sound.
fn ts(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.f%:z").to_string()
}

const EVENT_COLUMNS: &str =
    "id, text, description, type, impact, start_date, end_date, status, system, created_by, contact_email";

const ACTIVE_PREDICATE: &str = "((type = 'incident' AND end_date IS NULL) \
     OR (type IN ('maintenance', 'info') \
         AND start_date <= ? AND (end_date IS NULL OR end_date >= ?) \
         AND NOT EXISTS (SELECT 1 FROM incident_status s \
                         WHERE s.incident_id = incident.id \
                           AND s.status IN ('completed', 'cancelled'))))";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only works for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../migrations/001_init.sql"))?;
        Ok(())
    }

    // ── Events ─────────────────────────────────────────────────

    pub fn get_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        query_events(&conn, filter, false)
    }

    /// Events plus the total row count of the unpaginated filter, for the
    /// paginated listing.
    pub fn get_events_with_count(&self, filter: &EventFilter) -> StoreResult<(Vec<Event>, i64)> {
        let conn = self.conn.lock().unwrap();
        let (clause, args) = filter_clauses(filter, Utc::now());
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM incident {}", clause),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        let events = query_events(&conn, filter, true)?;
        Ok((events, total))
    }

    pub fn get_event(&self, id: i64) -> StoreResult<Option<Event>> {
        let conn = self.conn.lock().unwrap();
        load_event(&conn, id)
    }

    pub fn get_events_by_component_id(
        &self,
        component_id: i64,
        filter: &EventFilter,
    ) -> StoreResult<Vec<Event>> {
        let mut filter = filter.clone();
        filter.component_ids = vec![component_id];
        self.get_events(&filter)
    }

    pub fn get_events_by_component_attr(
        &self,
        attr_name: &str,
        attr_value: &str,
        filter: &EventFilter,
    ) -> StoreResult<Vec<Event>> {
        let ids: Vec<i64> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT component_id FROM component_attribute WHERE name = ?1 AND value = ?2",
            )?;
            let rows = stmt.query_map(params![attr_name, attr_value], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut filter = filter.clone();
        filter.component_ids = ids;
        self.get_events(&filter)
    }

    /// Persist a new event with its component relations and any update-log
    /// entries it already carries.
    pub fn save_event(&self, event: &Event) -> StoreResult<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO incident (text, description, start_date, end_date, impact, system, type, status, created_by, contact_email)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.title,
                event.description,
                ts(event.start_date),
                event.end_date.map(ts),
                event.impact,
                event.system as i64,
                event.event_type.to_string(),
                event.status,
                event.created_by,
                event.contact_email,
            ],
        )?;
        let id = tx.last_insert_rowid();
        for comp in event.components.iter() {
            tx.execute(
                "INSERT OR IGNORE INTO incident_component_relation (incident_id, component_id) VALUES (?1, ?2)",
                params![id, comp.id],
            )?;
        }
        for update in event.updates.iter() {
            insert_update(&tx, id, update)?;
        }
        tx.commit()?;
        Ok(id)
    }

    /// Persist changed event fields and append any update-log entries that
    /// have not been stored yet (id 0), atomically.
    pub fn modify_event(&self, event: &Event) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE incident SET text = ?1, description = ?2, start_date = ?3, end_date = ?4, impact = ?5, type = ?6, status = ?7
             WHERE id = ?8",
            params![
                event.title,
                event.description,
                ts(event.start_date),
                event.end_date.map(ts),
                event.impact,
                event.event_type.to_string(),
                event.status,
                event.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        for update in event.updates.iter().filter(|u| u.id == 0) {
            insert_update(&tx, event.id, update)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Clear the end date of a closed incident.
    pub fn reopen_event(&self, id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("UPDATE incident SET end_date = NULL WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_event_updates(&self, event_id: i64) -> StoreResult<Vec<EventUpdate>> {
        let conn = self.conn.lock().unwrap();
        load_updates(&conn, event_id)
    }

    /// Edit the text of one update entry in place; the other fields are
    /// immutable.
    pub fn modify_event_update(
        &self,
        event_id: i64,
        update_id: i64,
        text: &str,
    ) -> StoreResult<EventUpdate> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE incident_status SET text = ?1 WHERE id = ?2 AND incident_id = ?3",
            params![text, update_id, event_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        let update = conn.query_row(
            "SELECT id, status, text, timestamp FROM incident_status WHERE id = ?1",
            params![update_id],
            map_update,
        )?;
        Ok(update)
    }

    // ── Movement / extraction ──────────────────────────────────

    /// Move `comp` from `src` to the event `dst_id`. Unless the source is
    /// being closed the component is detached from it; both sides get a
    /// `SYSTEM` note carrying the same timestamp.
    pub fn move_component_between_events(
        &self,
        comp: &Component,
        src: &Event,
        dst_id: i64,
        close_src: bool,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();
        if !close_src {
            tx.execute(
                "DELETE FROM incident_component_relation WHERE incident_id = ?1 AND component_id = ?2",
                params![src.id, comp.id],
            )?;
        }
        tx.execute(
            "INSERT OR IGNORE INTO incident_component_relation (incident_id, component_id) VALUES (?1, ?2)",
            params![dst_id, comp.id],
        )?;
        insert_update(
            &tx,
            src.id,
            &EventUpdate::new(
                SYSTEM_STATUS,
                &format!("component {} moved to event {}", comp.name, dst_id),
                now,
            ),
        )?;
        insert_update(
            &tx,
            dst_id,
            &EventUpdate::new(
                SYSTEM_STATUS,
                &format!("component {} moved from event {}", comp.name, src.id),
                now,
            ),
        )?;
        if close_src {
            tx.execute(
                "UPDATE incident SET end_date = ?1 WHERE id = ?2",
                params![ts(now), src.id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Attach a component to an existing event, with a `SYSTEM` note.
    pub fn add_component_to_event(&self, event_id: i64, comp: &Component) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO incident_component_relation (incident_id, component_id) VALUES (?1, ?2)",
            params![event_id, comp.id],
        )?;
        insert_update(
            &tx,
            event_id,
            &EventUpdate::new(
                SYSTEM_STATUS,
                &format!("component {} added", comp.name),
                Utc::now(),
            ),
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Create a new incident owning `comps`, detach them from `src`, write
    /// `SYSTEM` notes on both sides. All inside one transaction.
    pub fn extract_components_to_new_event(
        &self,
        comps: &[Component],
        src: &Event,
        impact: u8,
        title: &str,
        description: Option<&str>,
    ) -> StoreResult<Event> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();
        tx.execute(
            "INSERT INTO incident (text, description, start_date, end_date, impact, system, type, status, created_by, contact_email)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, 'incident', ?6, ?7, NULL)",
            params![
                title,
                description,
                ts(now),
                impact,
                src.system as i64,
                src.status,
                src.created_by,
            ],
        )?;
        let new_id = tx.last_insert_rowid();
        for comp in comps.iter() {
            tx.execute(
                "DELETE FROM incident_component_relation WHERE incident_id = ?1 AND component_id = ?2",
                params![src.id, comp.id],
            )?;
            tx.execute(
                "INSERT INTO incident_component_relation (incident_id, component_id) VALUES (?1, ?2)",
                params![new_id, comp.id],
            )?;
        }
        let names: Vec<&str> = comps.iter().map(|c| c.name.as_str()).collect();
        insert_update(
            &tx,
            src.id,
            &EventUpdate::new(
                SYSTEM_STATUS,
                &format!("components {} moved to event {}", names.join(", "), new_id),
                now,
            ),
        )?;
        insert_update(
            &tx,
            new_id,
            &EventUpdate::new(
                SYSTEM_STATUS,
                &format!("components {} moved from event {}", names.join(", "), src.id),
                now,
            ),
        )?;
        tx.commit()?;
        load_event(&conn, new_id)?.ok_or(StoreError::NotFound)
    }

    /// Raise the impact of an incident, leaving a `SYSTEM` note.
    pub fn increase_incident_impact(&self, event: &Event, new_impact: u8) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        insert_update(
            &tx,
            event.id,
            &EventUpdate::new(
                SYSTEM_STATUS,
                &format!("impact changed from {} to {}", event.impact, new_impact),
                Utc::now(),
            ),
        )?;
        tx.execute(
            "UPDATE incident SET impact = ?1 WHERE id = ?2",
            params![new_impact, event.id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ── Reconciler scans ───────────────────────────────────────

    pub fn get_maintenances(&self, after_id: i64) -> StoreResult<Vec<Event>> {
        self.get_kind_from(EventType::Maintenance, after_id)
    }

    pub fn get_info_events(&self, after_id: i64) -> StoreResult<Vec<Event>> {
        self.get_kind_from(EventType::Info, after_id)
    }

    fn get_kind_from(&self, kind: EventType, after_id: i64) -> StoreResult<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM incident WHERE type = ?1 AND id >= ?2 ORDER BY id ASC",
            EVENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![kind.to_string(), after_id], map_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(hydrate(&conn, row?)?);
        }
        Ok(events)
    }

    // ── Components ─────────────────────────────────────────────

    /// Insert a component with its attributes; rejects a duplicate
    /// `(name, region)` pair.
    pub fn save_component(
        &self,
        name: &str,
        attributes: &[ComponentAttribute],
    ) -> StoreResult<i64> {
        let region = attributes
            .iter()
            .find(|a| a.name == "region")
            .map(|a| a.value.clone())
            .unwrap_or_default();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT c.id FROM component c
                 JOIN component_attribute a ON a.component_id = c.id
                 WHERE c.name = ?1 AND a.name = 'region' AND a.value = ?2",
                params![name, region],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::ComponentExists);
        }
        tx.execute("INSERT INTO component (name) VALUES (?1)", params![name])?;
        let id = tx.last_insert_rowid();
        for attr in attributes.iter() {
            tx.execute(
                "INSERT INTO component_attribute (component_id, name, value) VALUES (?1, ?2, ?3)",
                params![id, attr.name, attr.value],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    pub fn get_component(&self, id: i64) -> StoreResult<Option<Component>> {
        let conn = self.conn.lock().unwrap();
        load_component(&conn, id)
    }

    pub fn get_components(&self) -> StoreResult<Vec<Component>> {
        let conn = self.conn.lock().unwrap();
        load_all_components(&conn)
    }

    pub fn get_components_as_map(&self) -> StoreResult<HashMap<i64, Component>> {
        Ok(self
            .get_components()?
            .into_iter()
            .map(|c| (c.id, c))
            .collect())
    }

    /// Resolve a component by its name plus region attribute value, the key
    /// the monitoring ingestion path uses.
    pub fn get_component_from_name_attrs(
        &self,
        name: &str,
        region: &str,
    ) -> StoreResult<Option<Component>> {
        let conn = self.conn.lock().unwrap();
        let id: Option<i64> = conn
            .query_row(
                "SELECT c.id FROM component c
                 JOIN component_attribute a ON a.component_id = c.id
                 WHERE c.name = ?1 AND a.name = 'region' AND a.value = ?2",
                params![name, region],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => load_component(&conn, id),
            None => Ok(None),
        }
    }

    /// All components, each with its incidents (any lifecycle state).
    pub fn get_components_with_incidents(&self) -> StoreResult<Vec<(Component, Vec<Event>)>> {
        let components = self.get_components()?;
        let mut result = Vec::with_capacity(components.len());
        for comp in components {
            let events = self.get_events_by_component_id(
                comp.id,
                &EventFilter {
                    types: vec![EventType::Incident],
                    ..Default::default()
                },
            )?;
            result.push((comp, events));
        }
        Ok(result)
    }

    /// Distinct values of one attribute name across all components.
    pub fn get_unique_attribute_values(&self, name: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT value FROM component_attribute WHERE name = ?1 ORDER BY value",
        )?;
        let rows = stmt.query_map(params![name], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

// ── Row mapping helpers ────────────────────────────────────────

fn map_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let type_str: String = row.get(3)?;
    let event_type = type_str.parse::<EventType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        event_type,
        impact: row.get::<_, i64>(4)? as u8,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        status: row.get(7)?,
        system: row.get::<_, i64>(8)? != 0,
        created_by: row.get(9)?,
        contact_email: row.get(10)?,
        updates: Vec::new(),
        components: Vec::new(),
    })
}

fn map_update(row: &rusqlite::Row) -> rusqlite::Result<EventUpdate> {
    Ok(EventUpdate {
        id: row.get(0)?,
        status: row.get(1)?,
        text: row.get(2)?,
        timestamp: row.get(3)?,
    })
}

fn hydrate(conn: &Connection, mut event: Event) -> StoreResult<Event> {
    event.updates = load_updates(conn, event.id)?;
    event.components = load_components_for_event(conn, event.id)?;
    Ok(event)
}

fn load_event(conn: &Connection, id: i64) -> StoreResult<Option<Event>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM incident WHERE id = ?1", EVENT_COLUMNS),
            params![id],
            map_event,
        )
        .optional()?;
    match row {
        Some(row) => Ok(Some(hydrate(conn, row)?)),
        None => Ok(None),
    }
}

fn load_updates(conn: &Connection, event_id: i64) -> StoreResult<Vec<EventUpdate>> {
    let mut stmt = conn.prepare(
        "SELECT id, status, text, timestamp FROM incident_status WHERE incident_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![event_id], map_update)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_attributes(conn: &Connection, component_id: i64) -> StoreResult<Vec<ComponentAttribute>> {
    let mut stmt = conn.prepare(
        "SELECT name, value FROM component_attribute WHERE component_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![component_id], |row| {
        Ok(ComponentAttribute {
            name: row.get(0)?,
            value: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_component(conn: &Connection, id: i64) -> StoreResult<Option<Component>> {
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM component WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match name {
        Some(name) => Ok(Some(Component {
            id,
            name,
            attributes: load_attributes(conn, id)?,
        })),
        None => Ok(None),
    }
}

fn load_all_components(conn: &Connection) -> StoreResult<Vec<Component>> {
    let mut stmt = conn.prepare("SELECT id, name FROM component ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut components = Vec::new();
    for row in rows {
        let (id, name) = row?;
        components.push(Component {
            id,
            name,
            attributes: load_attributes(conn, id)?,
        });
    }
    Ok(components)
}

fn load_components_for_event(conn: &Connection, event_id: i64) -> StoreResult<Vec<Component>> {
    let mut stmt = conn.prepare(
        "SELECT component_id FROM incident_component_relation WHERE incident_id = ?1 ORDER BY component_id ASC",
    )?;
    let ids: Vec<i64> = stmt
        .query_map(params![event_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut components = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(comp) = load_component(conn, id)? {
            components.push(comp);
        }
    }
    Ok(components)
}

fn insert_update(conn: &Connection, event_id: i64, update: &EventUpdate) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO incident_status (incident_id, status, text, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![event_id, update.status, update.text, ts(update.timestamp)],
    )?;
    Ok(())
}

fn query_events(
    conn: &Connection,
    filter: &EventFilter,
    paginate: bool,
) -> StoreResult<Vec<Event>> {
    let (clause, mut args) = filter_clauses(filter, Utc::now());
    let mut sql = format!(
        "SELECT {} FROM incident {} ORDER BY id ASC",
        EVENT_COLUMNS, clause
    );
    if paginate {
        let limit = filter.limit.unwrap_or(10) as i64;
        let page = filter.page.unwrap_or(1).max(1) as i64;
        sql.push_str(" LIMIT ? OFFSET ?");
        args.push(Value::Integer(limit));
        args.push(Value::Integer((page - 1) * limit));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), map_event)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(hydrate(conn, row?)?);
    }
    Ok(events)
}

fn filter_clauses(filter: &EventFilter, now: DateTime<Utc>) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if !filter.types.is_empty() {
        let marks = vec!["?"; filter.types.len()].join(", ");
        clauses.push(format!("type IN ({})", marks));
        for t in filter.types.iter() {
            args.push(Value::Text(t.to_string()));
        }
    }
    if let Some(impact) = filter.impact {
        clauses.push("impact = ?".to_string());
        args.push(Value::Integer(impact as i64));
    }
    if let Some(system) = filter.system {
        clauses.push("system = ?".to_string());
        args.push(Value::Integer(system as i64));
    }
    if let Some(status) = &filter.status {
        clauses.push("status = ?".to_string());
        args.push(Value::Text(status.clone()));
    }
    if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
        clauses.push("start_date >= ?".to_string());
        args.push(Value::Text(ts(start)));
        clauses.push("start_date <= ?".to_string());
        args.push(Value::Text(ts(end)));
    }
    if !filter.component_ids.is_empty() {
        let marks = vec!["?"; filter.component_ids.len()].join(", ");
        clauses.push(format!(
            "id IN (SELECT incident_id FROM incident_component_relation WHERE component_id IN ({}))",
            marks
        ));
        for id in filter.component_ids.iter() {
            args.push(Value::Integer(*id));
        }
    }
    if filter.is_active == Some(true) {
        clauses.push(ACTIVE_PREDICATE.to_string());
        args.push(Value::Text(ts(now)));
        args.push(Value::Text(ts(now)));
    }

    if clauses.is_empty() {
        (String::new(), args)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), args)
    }
}
