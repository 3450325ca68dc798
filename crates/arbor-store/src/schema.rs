/// SQL DDL for the arbor database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    uuid TEXT PRIMARY KEY,
    parent_uuid TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    created_at INTEGER NOT NULL,
    ended_at INTEGER NOT NULL DEFAULT 0,
    fork_message_id INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_uuid TEXT,
    kind TEXT NOT NULL,
    content TEXT,
    data TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// Created after legacy `events` tables have been given an `agent_uuid`
/// column.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_events_agent_id ON events(agent_uuid, id);
CREATE INDEX IF NOT EXISTS idx_events_agent_kind ON events(agent_uuid, kind);
CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status, created_at);
CREATE INDEX IF NOT EXISTS idx_agents_parent ON agents(parent_uuid);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
