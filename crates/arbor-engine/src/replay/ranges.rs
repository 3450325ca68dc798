//! Backward walk from an agent up its ancestry, producing the event
//! windows that make up its visible history.

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::debug;

use arbor_core::ids::AgentId;
use arbor_core::replay::ReplayRange;
use arbor_store::{agents, events};

use crate::error::EngineError;

/// Replay ranges for `target`, root-first.
///
/// Each step caps the window at the fork point the previous (child) agent
/// was created from. A `clear` inside the window truncates it and ends the
/// walk, since nothing older is visible past a clear.
pub fn build_ranges(conn: &Connection, target: &AgentId) -> Result<Vec<ReplayRange>, EngineError> {
    let mut ranges = Vec::new();
    let mut seen = HashSet::new();
    let mut current = target.clone();
    let mut end_id = 0;

    loop {
        if !seen.insert(current.clone()) {
            return Err(EngineError::Corrupt(format!(
                "parent cycle through agent {current}"
            )));
        }

        let clear_id = events::find_last_clear(conn, &current, end_id)?;
        if clear_id > 0 {
            ranges.push(ReplayRange::new(current, clear_id, end_id));
            break;
        }
        ranges.push(ReplayRange::new(current.clone(), 0, end_id));

        let row = agents::get(conn, &current)?;
        let Some(parent) = row.parent_uuid else {
            break;
        };
        if row.fork_message_id == 0 {
            // Forked before the parent wrote anything: nothing to inherit.
            debug!(agent_uuid = %current, "fork point is empty, stopping walk");
            break;
        }
        end_id = row.fork_message_id;
        current = parent;
    }

    ranges.reverse();
    Ok(ranges)
}
