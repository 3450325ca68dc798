//! SQLite persistence for arbor: the agent registry and the append-only
//! event log, sharing one connection.

pub mod agents;
pub mod database;
pub mod error;
pub mod events;
pub mod row_helpers;
pub mod schema;

pub use agents::{AgentRepo, AgentRow, AgentStatus, RootAgent};
pub use database::Database;
pub use error::StoreError;
pub use events::{EventRepo, EventRow};
