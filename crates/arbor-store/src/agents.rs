//! Agent registry: identity, status and ancestry of every agent ever
//! created. Rows are never deleted; the only transition is running -> dead.
//!
//! Every operation exists both as a free function over a [`Connection`]
//! (so callers can compose several inside one transaction) and as a method
//! on [`AgentRepo`].

use std::collections::HashSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use arbor_core::ids::{AgentId, EventId};

use crate::database::{now_secs, Database};
use crate::error::{is_unique_violation, StoreError};
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Dead,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "dead" => Ok(Self::Dead),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRow {
    pub uuid: AgentId,
    /// `None` only for the tree root.
    pub parent_uuid: Option<AgentId>,
    pub status: AgentStatus,
    /// Unix seconds. Only a hint for ordering; clocks may skew.
    pub created_at: i64,
    /// Unix seconds, 0 while running.
    pub ended_at: i64,
    /// Last event id in the parent's stream when this agent was forked.
    pub fork_message_id: EventId,
}

impl AgentRow {
    pub fn new_root() -> Self {
        Self {
            uuid: AgentId::new(),
            parent_uuid: None,
            status: AgentStatus::Running,
            created_at: now_secs(),
            ended_at: 0,
            fork_message_id: 0,
        }
    }

    pub fn new_child(parent: &AgentId, fork_message_id: EventId) -> Self {
        Self {
            parent_uuid: Some(parent.clone()),
            fork_message_id,
            ..Self::new_root()
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_uuid.is_none()
    }

    pub fn is_running(&self) -> bool {
        self.status == AgentStatus::Running
    }
}

/// Result of [`ensure_root`].
#[derive(Clone, Debug)]
pub struct RootAgent {
    pub row: AgentRow,
    /// True when the root was created by this call.
    pub created: bool,
    /// Legacy events tagged with the new root's uuid.
    pub adopted_events: usize,
}

const AGENT_COLUMNS: &str =
    "uuid, parent_uuid, status, created_at, ended_at, fork_message_id";

fn row_to_agent(row: &rusqlite::Row<'_>) -> Result<AgentRow, StoreError> {
    let uuid: String = row_helpers::get(row, 0, "agents", "uuid")?;
    let parent: Option<String> = row_helpers::get_opt(row, 1, "agents", "parent_uuid")?;
    let status: String = row_helpers::get(row, 2, "agents", "status")?;
    Ok(AgentRow {
        uuid: AgentId::from_raw(uuid),
        parent_uuid: parent.map(AgentId::from_raw),
        status: row_helpers::parse_enum(&status, "agents", "status")?,
        created_at: row_helpers::get(row, 3, "agents", "created_at")?,
        ended_at: row_helpers::get(row, 4, "agents", "ended_at")?,
        fork_message_id: row_helpers::get(row, 5, "agents", "fork_message_id")?,
    })
}

fn query_agents(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<AgentRow>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_agent(row)?);
    }
    Ok(out)
}

/// Insert a new agent. A duplicate uuid is a [`StoreError::Conflict`].
pub fn insert(conn: &Connection, agent: &AgentRow) -> Result<(), StoreError> {
    let result = conn.execute(
        "INSERT INTO agents (uuid, parent_uuid, status, created_at, ended_at, fork_message_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            agent.uuid.as_str(),
            agent.parent_uuid.as_ref().map(AgentId::as_str),
            agent.status.to_string(),
            agent.created_at,
            agent.ended_at,
            agent.fork_message_id,
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            Err(StoreError::Conflict(format!("agent {} already exists", agent.uuid)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Flip an agent to dead. Returns whether this call made the transition;
/// an already-dead agent is left untouched, `ended_at` included.
pub fn mark_dead(conn: &Connection, uuid: &AgentId) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE agents SET status = 'dead', ended_at = ?2 WHERE uuid = ?1 AND status = 'running'",
        rusqlite::params![uuid.as_str(), now_secs()],
    )?;
    if changed == 0 && find(conn, uuid)?.is_none() {
        return Err(StoreError::NotFound(format!("agent {uuid}")));
    }
    Ok(changed > 0)
}

pub fn find(conn: &Connection, uuid: &AgentId) -> Result<Option<AgentRow>, StoreError> {
    let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE uuid = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([uuid.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_agent(row)?)),
        None => Ok(None),
    }
}

pub fn get(conn: &Connection, uuid: &AgentId) -> Result<AgentRow, StoreError> {
    find(conn, uuid)?.ok_or_else(|| StoreError::NotFound(format!("agent {uuid}")))
}

/// Running agents, oldest first. Ties keep insertion order.
pub fn list_running(conn: &Connection) -> Result<Vec<AgentRow>, StoreError> {
    let sql = format!(
        "SELECT {AGENT_COLUMNS} FROM agents WHERE status = 'running' ORDER BY created_at, rowid"
    );
    query_agents(conn, &sql, [])
}

/// Direct children of any status, oldest first.
pub fn get_children(conn: &Connection, parent: &AgentId) -> Result<Vec<AgentRow>, StoreError> {
    let sql = format!(
        "SELECT {AGENT_COLUMNS} FROM agents WHERE parent_uuid = ?1 ORDER BY created_at, rowid"
    );
    query_agents(conn, &sql, [parent.as_str()])
}

/// `None` for the root. An unknown `uuid` is [`StoreError::NotFound`].
pub fn get_parent(conn: &Connection, uuid: &AgentId) -> Result<Option<AgentRow>, StoreError> {
    match get(conn, uuid)?.parent_uuid {
        Some(parent) => find(conn, &parent),
        None => Ok(None),
    }
}

pub fn get_root(conn: &Connection) -> Result<Option<AgentRow>, StoreError> {
    let sql = format!(
        "SELECT {AGENT_COLUMNS} FROM agents WHERE parent_uuid IS NULL ORDER BY created_at, rowid LIMIT 1"
    );
    Ok(query_agents(conn, &sql, [])?.into_iter().next())
}

/// Create the root on first run. Events written before the registry
/// existed (`agent_uuid IS NULL`) are adopted by the new root.
pub fn ensure_root(conn: &Connection) -> Result<RootAgent, StoreError> {
    if let Some(row) = get_root(conn)? {
        return Ok(RootAgent {
            row,
            created: false,
            adopted_events: 0,
        });
    }

    let row = AgentRow::new_root();
    insert(conn, &row)?;
    let adopted_events = conn.execute(
        "UPDATE events SET agent_uuid = ?1 WHERE agent_uuid IS NULL",
        [row.uuid.as_str()],
    )?;
    Ok(RootAgent {
        row,
        created: true,
        adopted_events,
    })
}

/// Highest event id in the agent's stream, 0 if it has none.
pub fn get_last_event_id(conn: &Connection, agent: &AgentId) -> Result<EventId, StoreError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(id), 0) FROM events WHERE agent_uuid = ?1",
        [agent.as_str()],
        |row| row.get(0),
    )?)
}

/// Running agents whose uuid starts with `prefix`, oldest first.
pub fn find_running_by_prefix(conn: &Connection, prefix: &str) -> Result<Vec<AgentRow>, StoreError> {
    let sql = format!(
        "SELECT {AGENT_COLUMNS} FROM agents
         WHERE status = 'running' AND uuid LIKE ?1 ESCAPE '\\'
         ORDER BY created_at, rowid"
    );
    let pattern = format!("{}%", row_helpers::escape_like(prefix));
    query_agents(conn, &sql, [pattern])
}

/// All running descendants of `uuid`, depth-first with the deepest agents
/// first. Dead intermediate agents are walked through but not returned.
pub fn running_descendants(conn: &Connection, uuid: &AgentId) -> Result<Vec<AgentRow>, StoreError> {
    let mut seen = HashSet::new();
    let _ = seen.insert(uuid.clone());
    let mut out = Vec::new();
    collect_descendants(conn, uuid, &mut seen, &mut out)?;
    Ok(out)
}

fn collect_descendants(
    conn: &Connection,
    parent: &AgentId,
    seen: &mut HashSet<AgentId>,
    out: &mut Vec<AgentRow>,
) -> Result<(), StoreError> {
    for child in get_children(conn, parent)? {
        if !seen.insert(child.uuid.clone()) {
            continue;
        }
        collect_descendants(conn, &child.uuid, seen, out)?;
        if child.is_running() {
            out.push(child);
        }
    }
    Ok(())
}

pub struct AgentRepo {
    db: Database,
}

impl AgentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, agent), fields(agent_uuid = %agent.uuid))]
    pub fn insert(&self, agent: &AgentRow) -> Result<(), StoreError> {
        self.db.with_conn(|conn| insert(conn, agent))
    }

    #[instrument(skip(self), fields(agent_uuid = %uuid))]
    pub fn mark_dead(&self, uuid: &AgentId) -> Result<bool, StoreError> {
        let transitioned = self.db.with_conn(|conn| mark_dead(conn, uuid))?;
        if !transitioned {
            debug!("agent already dead");
        }
        Ok(transitioned)
    }

    #[instrument(skip(self), fields(agent_uuid = %uuid))]
    pub fn get(&self, uuid: &AgentId) -> Result<AgentRow, StoreError> {
        self.db.with_conn(|conn| get(conn, uuid))
    }

    #[instrument(skip(self))]
    pub fn list_running(&self) -> Result<Vec<AgentRow>, StoreError> {
        self.db.with_conn(list_running)
    }

    #[instrument(skip(self), fields(agent_uuid = %parent))]
    pub fn get_children(&self, parent: &AgentId) -> Result<Vec<AgentRow>, StoreError> {
        self.db.with_conn(|conn| get_children(conn, parent))
    }

    #[instrument(skip(self), fields(agent_uuid = %uuid))]
    pub fn get_parent(&self, uuid: &AgentId) -> Result<Option<AgentRow>, StoreError> {
        self.db.with_conn(|conn| get_parent(conn, uuid))
    }

    pub fn get_root(&self) -> Result<Option<AgentRow>, StoreError> {
        self.db.with_conn(get_root)
    }

    #[instrument(skip(self))]
    pub fn ensure_root(&self) -> Result<RootAgent, StoreError> {
        let root = self.db.transaction(|tx| ensure_root(tx))?;
        if root.created {
            info!(
                agent_uuid = %root.row.uuid,
                adopted = root.adopted_events,
                "created root agent"
            );
        }
        Ok(root)
    }

    #[instrument(skip(self), fields(agent_uuid = %agent))]
    pub fn get_last_event_id(&self, agent: &AgentId) -> Result<EventId, StoreError> {
        self.db.with_conn(|conn| get_last_event_id(conn, agent))
    }

    #[instrument(skip(self))]
    pub fn find_running_by_prefix(&self, prefix: &str) -> Result<Vec<AgentRow>, StoreError> {
        self.db.with_conn(|conn| find_running_by_prefix(conn, prefix))
    }

    #[instrument(skip(self), fields(agent_uuid = %uuid))]
    pub fn running_descendants(&self, uuid: &AgentId) -> Result<Vec<AgentRow>, StoreError> {
        self.db.with_conn(|conn| running_descendants(conn, uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::events::EventKind;

    fn setup() -> (Database, AgentRepo) {
        let db = Database::in_memory().unwrap();
        let repo = AgentRepo::new(db.clone());
        (db, repo)
    }

    fn row(parent: Option<&AgentRow>, created_at: i64) -> AgentRow {
        AgentRow {
            uuid: AgentId::new(),
            parent_uuid: parent.map(|p| p.uuid.clone()),
            status: AgentStatus::Running,
            created_at,
            ended_at: 0,
            fork_message_id: 0,
        }
    }

    fn add_event(db: &Database, agent: &AgentId) -> EventId {
        db.with_conn(|conn| crate::events::append(conn, agent, EventKind::User, Some("hi"), None))
            .unwrap()
            .id
    }

    #[test]
    fn insert_and_get() {
        let (_db, repo) = setup();
        let root = row(None, 10);
        repo.insert(&root).unwrap();
        let got = repo.get(&root.uuid).unwrap();
        assert_eq!(got, root);
        assert!(got.is_root());
    }

    #[test]
    fn duplicate_insert_is_conflict() {
        let (_db, repo) = setup();
        let root = row(None, 10);
        repo.insert(&root).unwrap();
        let err = repo.insert(&root).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got: {err:?}");
    }

    #[test]
    fn get_unknown_is_not_found() {
        let (_db, repo) = setup();
        let err = repo.get(&AgentId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn mark_dead_is_idempotent() {
        let (db, repo) = setup();
        let agent = row(None, 10);
        repo.insert(&agent).unwrap();

        assert!(repo.mark_dead(&agent.uuid).unwrap());
        let first = repo.get(&agent.uuid).unwrap();
        assert_eq!(first.status, AgentStatus::Dead);
        assert!(first.ended_at > 0);

        // Push ended_at somewhere recognisable; a second mark must not touch it.
        db.with_conn(|conn| {
            conn.execute("UPDATE agents SET ended_at = 42 WHERE uuid = ?1", [agent.uuid.as_str()])?;
            Ok(())
        })
        .unwrap();
        assert!(!repo.mark_dead(&agent.uuid).unwrap());
        assert_eq!(repo.get(&agent.uuid).unwrap().ended_at, 42);
    }

    #[test]
    fn mark_dead_unknown_is_not_found() {
        let (_db, repo) = setup();
        assert!(matches!(
            repo.mark_dead(&AgentId::new()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_running_orders_and_excludes_dead() {
        let (_db, repo) = setup();
        let root = row(None, 5);
        let late = row(Some(&root), 30);
        let early = row(Some(&root), 20);
        let dead = row(Some(&root), 25);
        for r in [&root, &late, &early, &dead] {
            repo.insert(r).unwrap();
        }
        repo.mark_dead(&dead.uuid).unwrap();

        let running: Vec<AgentId> = repo.list_running().unwrap().into_iter().map(|r| r.uuid).collect();
        assert_eq!(running, vec![root.uuid, early.uuid, late.uuid]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let (_db, repo) = setup();
        let root = row(None, 5);
        let a = row(Some(&root), 5);
        let b = row(Some(&root), 5);
        for r in [&root, &a, &b] {
            repo.insert(r).unwrap();
        }
        let children: Vec<AgentId> = repo
            .get_children(&root.uuid)
            .unwrap()
            .into_iter()
            .map(|r| r.uuid)
            .collect();
        assert_eq!(children, vec![a.uuid, b.uuid]);
    }

    #[test]
    fn get_parent_of_root_is_none() {
        let (_db, repo) = setup();
        let root = row(None, 1);
        let child = row(Some(&root), 2);
        repo.insert(&root).unwrap();
        repo.insert(&child).unwrap();

        assert!(repo.get_parent(&root.uuid).unwrap().is_none());
        assert_eq!(repo.get_parent(&child.uuid).unwrap().unwrap().uuid, root.uuid);
    }

    #[test]
    fn ensure_root_is_idempotent() {
        let (_db, repo) = setup();
        let first = repo.ensure_root().unwrap();
        assert!(first.created);
        let second = repo.ensure_root().unwrap();
        assert!(!second.created);
        assert_eq!(first.row.uuid, second.row.uuid);
        assert_eq!(repo.list_running().unwrap().len(), 1);
    }

    #[test]
    fn ensure_root_adopts_orphan_events() {
        let (db, repo) = setup();
        db.with_conn(|conn| {
            conn.execute_batch(
                "INSERT INTO events (agent_uuid, kind, content, created_at) VALUES (NULL, 'user', 'a', 1);
                 INSERT INTO events (agent_uuid, kind, content, created_at) VALUES (NULL, 'assistant', 'b', 2);",
            )?;
            Ok(())
        })
        .unwrap();

        let root = repo.ensure_root().unwrap();
        assert_eq!(root.adopted_events, 2);
        assert_eq!(repo.get_last_event_id(&root.row.uuid).unwrap(), 2);
    }

    #[test]
    fn last_event_id_is_per_agent() {
        let (db, repo) = setup();
        let a = row(None, 1);
        let b = row(Some(&a), 2);
        repo.insert(&a).unwrap();
        repo.insert(&b).unwrap();
        assert_eq!(repo.get_last_event_id(&a.uuid).unwrap(), 0);

        let e1 = add_event(&db, &a.uuid);
        let e2 = add_event(&db, &b.uuid);
        assert_eq!(repo.get_last_event_id(&a.uuid).unwrap(), e1);
        assert_eq!(repo.get_last_event_id(&b.uuid).unwrap(), e2);
    }

    #[test]
    fn prefix_lookup_matches_running_only() {
        let (_db, repo) = setup();
        let mut a = row(None, 1);
        a.uuid = AgentId::from_raw("abcd1111");
        let mut b = row(Some(&a), 2);
        b.uuid = AgentId::from_raw("abcd2222");
        let mut c = row(Some(&a), 3);
        c.uuid = AgentId::from_raw("abce3333");
        for r in [&a, &b, &c] {
            repo.insert(r).unwrap();
        }
        repo.mark_dead(&b.uuid).unwrap();

        let hits = repo.find_running_by_prefix("abcd").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].uuid, a.uuid);
        assert_eq!(repo.find_running_by_prefix("abc").unwrap().len(), 2);
        assert!(repo.find_running_by_prefix("ab%").unwrap().is_empty());
    }

    #[test]
    fn descendants_are_depth_first_through_dead_agents() {
        let (_db, repo) = setup();
        let root = row(None, 1);
        let target = row(Some(&root), 2);
        let dead_mid = row(Some(&target), 3);
        let grandchild = row(Some(&dead_mid), 4);
        let child = row(Some(&target), 5);
        let great = row(Some(&child), 6);
        for r in [&root, &target, &dead_mid, &grandchild, &child, &great] {
            repo.insert(r).unwrap();
        }
        repo.mark_dead(&dead_mid.uuid).unwrap();

        let victims: Vec<AgentId> = repo
            .running_descendants(&target.uuid)
            .unwrap()
            .into_iter()
            .map(|r| r.uuid)
            .collect();
        assert_eq!(victims, vec![grandchild.uuid, great.uuid, child.uuid]);
    }

    #[test]
    fn corrupt_status_is_reported() {
        let (db, repo) = setup();
        let agent = row(None, 1);
        repo.insert(&agent).unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE agents SET status = 'zombie'", [])?;
            Ok(())
        })
        .unwrap();
        assert!(matches!(
            repo.get(&agent.uuid),
            Err(StoreError::CorruptRow { column: "status", .. })
        ));
    }
}
