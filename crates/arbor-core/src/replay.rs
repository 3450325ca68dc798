use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, EventId};

/// One agent's slice of the log contributing to a reconstruction:
/// events with `start_id < id <= end_id`, where `end_id == 0` means no
/// upper bound.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRange {
    pub agent_uuid: AgentId,
    pub start_id: EventId,
    pub end_id: EventId,
}

impl ReplayRange {
    pub fn new(agent_uuid: AgentId, start_id: EventId, end_id: EventId) -> Self {
        Self {
            agent_uuid,
            start_id,
            end_id,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.end_id == 0
    }

    pub fn contains(&self, id: EventId) -> bool {
        id > self.start_id && (self.is_unbounded() || id <= self.end_id)
    }
}
