//! Append-only event log. Ids are log-wide and strictly increasing; rows
//! are never updated except for the one-time adoption of legacy orphans.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use arbor_core::events::EventKind;
use arbor_core::ids::{AgentId, EventId};
use arbor_core::replay::ReplayRange;

use crate::database::{now_secs, Database};
use crate::error::StoreError;
use crate::row_helpers;

/// A stored event row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: EventId,
    pub agent_uuid: AgentId,
    pub kind: EventKind,
    pub content: Option<String>,
    pub data: Option<Value>,
    pub created_at: i64,
}

const EVENT_COLUMNS: &str = "id, agent_uuid, kind, content, data, created_at";

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<EventRow, StoreError> {
    let agent: String = row_helpers::get(row, 1, "events", "agent_uuid")?;
    let kind: String = row_helpers::get(row, 2, "events", "kind")?;
    let data: Option<String> = row_helpers::get_opt(row, 4, "events", "data")?;
    Ok(EventRow {
        id: row_helpers::get(row, 0, "events", "id")?,
        agent_uuid: AgentId::from_raw(agent),
        kind: row_helpers::parse_enum(&kind, "events", "kind")?,
        content: row_helpers::get_opt(row, 3, "events", "content")?,
        data: data
            .map(|raw| row_helpers::parse_json(&raw, "events", "data"))
            .transpose()?,
        created_at: row_helpers::get(row, 5, "events", "created_at")?,
    })
}

fn query_events(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<EventRow>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_event(row)?);
    }
    Ok(out)
}

/// Append one event to an agent's stream and return the stored row.
pub fn append(
    conn: &Connection,
    agent: &AgentId,
    kind: EventKind,
    content: Option<&str>,
    data: Option<&Value>,
) -> Result<EventRow, StoreError> {
    let now = now_secs();
    let data_json = data.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO events (agent_uuid, kind, content, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![agent.as_str(), kind.as_str(), content, data_json, now],
    )?;
    Ok(EventRow {
        id: conn.last_insert_rowid(),
        agent_uuid: agent.clone(),
        kind,
        content: content.map(str::to_owned),
        data: data.cloned(),
        created_at: now,
    })
}

/// Most recent `clear` at or before `max_id` (0 = no cap). 0 if none.
pub fn find_last_clear(
    conn: &Connection,
    agent: &AgentId,
    max_id: EventId,
) -> Result<EventId, StoreError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(id), 0) FROM events
         WHERE agent_uuid = ?1 AND kind = 'clear' AND (?2 = 0 OR id <= ?2)",
        rusqlite::params![agent.as_str(), max_id],
        |row| row.get(0),
    )?)
}

/// Events of `range.agent_uuid` in `(start_id, end_id]`, ascending.
pub fn query_range(conn: &Connection, range: &ReplayRange) -> Result<Vec<EventRow>, StoreError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE agent_uuid = ?1 AND id > ?2 AND (?3 = 0 OR id <= ?3)
         ORDER BY id"
    );
    query_events(
        conn,
        &sql,
        rusqlite::params![range.agent_uuid.as_str(), range.start_id, range.end_id],
    )
}

/// Every event of one kind for an agent, ascending, ignoring clears.
pub fn query_kind(
    conn: &Connection,
    agent: &AgentId,
    kind: EventKind,
) -> Result<Vec<EventRow>, StoreError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE agent_uuid = ?1 AND kind = ?2 ORDER BY id"
    );
    query_events(conn, &sql, rusqlite::params![agent.as_str(), kind.as_str()])
}

pub fn count(conn: &Connection, agent: &AgentId) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM events WHERE agent_uuid = ?1",
        [agent.as_str()],
        |row| row.get(0),
    )?)
}

pub fn get(conn: &Connection, id: EventId) -> Result<EventRow, StoreError> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
    query_events(conn, &sql, [id])?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::NotFound(format!("event {id}")))
}

pub struct EventRepo {
    db: Database,
}

impl EventRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, content, data), fields(agent_uuid = %agent, kind = %kind))]
    pub fn append(
        &self,
        agent: &AgentId,
        kind: EventKind,
        content: Option<&str>,
        data: Option<&Value>,
    ) -> Result<EventRow, StoreError> {
        self.db.with_conn(|conn| append(conn, agent, kind, content, data))
    }

    #[instrument(skip(self), fields(agent_uuid = %agent))]
    pub fn find_last_clear(&self, agent: &AgentId, max_id: EventId) -> Result<EventId, StoreError> {
        self.db.with_conn(|conn| find_last_clear(conn, agent, max_id))
    }

    #[instrument(skip(self), fields(agent_uuid = %range.agent_uuid, start = range.start_id, end = range.end_id))]
    pub fn query_range(&self, range: &ReplayRange) -> Result<Vec<EventRow>, StoreError> {
        self.db.with_conn(|conn| query_range(conn, range))
    }

    #[instrument(skip(self), fields(agent_uuid = %agent, kind = %kind))]
    pub fn query_kind(&self, agent: &AgentId, kind: EventKind) -> Result<Vec<EventRow>, StoreError> {
        self.db.with_conn(|conn| query_kind(conn, agent, kind))
    }

    pub fn count(&self, agent: &AgentId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| count(conn, agent))
    }

    pub fn get(&self, id: EventId) -> Result<EventRow, StoreError> {
        self.db.with_conn(|conn| get(conn, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> EventRepo {
        EventRepo::new(Database::in_memory().unwrap())
    }

    fn user(repo: &EventRepo, agent: &AgentId, text: &str) -> EventId {
        repo.append(agent, EventKind::User, Some(text), None).unwrap().id
    }

    fn texts(rows: &[EventRow]) -> Vec<&str> {
        rows.iter().filter_map(|r| r.content.as_deref()).collect()
    }

    #[test]
    fn append_assigns_increasing_ids_across_agents() {
        let repo = setup();
        let a = AgentId::new();
        let b = AgentId::new();
        let first = user(&repo, &a, "one");
        let second = user(&repo, &b, "two");
        let third = user(&repo, &a, "three");
        assert!(first < second && second < third);
        assert_eq!(repo.count(&a).unwrap(), 2);
    }

    #[test]
    fn append_roundtrips_data() {
        let repo = setup();
        let a = AgentId::new();
        let data = json!({"command": "pin", "args": "src/lib.rs"});
        let row = repo.append(&a, EventKind::Command, None, Some(&data)).unwrap();
        let stored = repo.get(row.id).unwrap();
        assert_eq!(stored, row);
        assert_eq!(stored.data.unwrap()["args"], "src/lib.rs");
    }

    #[test]
    fn find_last_clear_respects_cap() {
        let repo = setup();
        let a = AgentId::new();
        assert_eq!(repo.find_last_clear(&a, 0).unwrap(), 0);

        user(&repo, &a, "m1");
        let c1 = repo.append(&a, EventKind::Clear, None, None).unwrap().id;
        let mid = user(&repo, &a, "m2");
        let c2 = repo.append(&a, EventKind::Clear, None, None).unwrap().id;

        assert_eq!(repo.find_last_clear(&a, 0).unwrap(), c2);
        assert_eq!(repo.find_last_clear(&a, mid).unwrap(), c1);
        assert_eq!(repo.find_last_clear(&a, c1).unwrap(), c1);
        assert_eq!(repo.find_last_clear(&a, c1 - 1).unwrap(), 0);
    }

    #[test]
    fn query_range_bounds() {
        let repo = setup();
        let a = AgentId::new();
        let other = AgentId::new();
        let e1 = user(&repo, &a, "e1");
        user(&repo, &other, "noise");
        let e2 = user(&repo, &a, "e2");
        user(&repo, &a, "e3");

        let all = repo.query_range(&ReplayRange::new(a.clone(), 0, 0)).unwrap();
        assert_eq!(texts(&all), vec!["e1", "e2", "e3"]);

        let window = repo.query_range(&ReplayRange::new(a.clone(), e1, e2)).unwrap();
        assert_eq!(texts(&window), vec!["e2"]);

        let tail = repo.query_range(&ReplayRange::new(a, e2, 0)).unwrap();
        assert_eq!(texts(&tail), vec!["e3"]);
    }

    #[test]
    fn query_kind_ignores_clears() {
        let repo = setup();
        let a = AgentId::new();
        let pin = |path: &str| json!({"command": "pin", "args": path});
        repo.append(&a, EventKind::Command, None, Some(&pin("a.rs"))).unwrap();
        repo.append(&a, EventKind::Clear, None, None).unwrap();
        repo.append(&a, EventKind::Command, None, Some(&pin("b.rs"))).unwrap();
        user(&repo, &a, "hi");

        let commands = repo.query_kind(&a, EventKind::Command).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].data.as_ref().unwrap()["args"], "b.rs");
    }

    #[test]
    fn get_missing_is_not_found() {
        let repo = setup();
        assert!(matches!(repo.get(99), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn corrupt_data_column_is_reported() {
        let db = Database::in_memory().unwrap();
        let repo = EventRepo::new(db.clone());
        let a = AgentId::new();
        let id = user(&repo, &a, "x");
        db.with_conn(|conn| {
            conn.execute("UPDATE events SET data = '{broken' WHERE id = ?1", [id])?;
            Ok(())
        })
        .unwrap();
        assert!(matches!(
            repo.get(id),
            Err(StoreError::CorruptRow { column: "data", .. })
        ));
    }
}
