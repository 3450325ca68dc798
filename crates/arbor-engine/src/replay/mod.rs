//! Walk backward, play forward.
//!
//! [`ranges::build_ranges`] walks from an agent up its ancestry collecting
//! the event windows it can see, [`executor::execute`] loads them in order
//! and [`reconstruct::reconstruct`] folds the result into an [`Agent`].

pub mod executor;
pub mod ranges;
pub mod reconstruct;

use rusqlite::Connection;

use crate::agent::Agent;
use crate::error::EngineError;

pub use executor::ReplayContext;
pub use reconstruct::ReplaySummary;

/// Rebuild one agent from the log.
pub fn replay_agent(conn: &Connection, agent: &mut Agent) -> Result<ReplaySummary, EngineError> {
    let ranges = ranges::build_ranges(conn, &agent.uuid)?;
    let ctx = executor::execute(conn, &ranges)?;
    reconstruct::reconstruct(conn, agent, ctx)
}
