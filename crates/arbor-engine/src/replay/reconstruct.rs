//! Play a [`ReplayContext`] forward into an agent's runtime state.
//!
//! Conversation, scrollback and the model selection come from the context.
//! Pins and the toolset filter must survive `/clear`, so they are rebuilt
//! from the agent's own child fork event and its full `pin`/`unpin`/
//! `toolset` history, read by kind rather than through the range walk.

use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use arbor_core::events::{command, fork_role, string_list, CommandPayload, EventKind, ForkRole};
use arbor_core::messages::Message;
use arbor_core::provider::ThinkingLevel;
use arbor_store::{events, EventRow};

use crate::agent::{Agent, Applied};
use crate::display::format_event;
use crate::error::EngineError;

use super::executor::ReplayContext;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub messages: usize,
    /// Conversation events that could not be turned into messages.
    pub dropped: usize,
    /// The model selection differs from what the agent started with; any
    /// cached provider handle is stale.
    pub model_changed: bool,
}

/// Rebuild `agent` from `ctx`, replacing whatever replayable state it had.
pub fn reconstruct(
    conn: &Connection,
    agent: &mut Agent,
    ctx: ReplayContext,
) -> Result<ReplaySummary, EngineError> {
    let initial_selection = agent.selection.clone();
    agent.reset_replayed_state();

    let mut summary = ReplaySummary {
        events: ctx.events.len(),
        ..ReplaySummary::default()
    };

    // The fork payload already holds the parent's state at the fork point,
    // so inherited commands are skipped once it has been applied.
    let seeded = match own_child_fork(conn, agent)? {
        Some(fork) => {
            seed_from_fork(agent, fork.data.as_ref());
            true
        }
        None => false,
    };

    for event in &ctx.events {
        agent.push_lines(format_event(event));

        if event.kind.is_conversation() {
            match Message::from_event(event.kind, event.content.as_deref()) {
                Ok(message) => agent.conversation.push(message),
                Err(e) => {
                    debug!(event_id = event.id, error = %e, "dropping unreadable conversation event");
                    summary.dropped += 1;
                }
            }
        } else if event.kind == EventKind::Command && (!seeded || event.agent_uuid == agent.uuid) {
            apply_context_command(agent, event);
        }
    }
    summary.messages = agent.conversation.len();
    agent.marks = ctx.marks;

    for event in events::query_kind(conn, &agent.uuid, EventKind::Command)? {
        match CommandPayload::from_data(event.data.as_ref()) {
            Some(cmd) if is_persistent(&cmd.command) => {
                let _ = agent.apply_command(&cmd);
            }
            _ => {}
        }
    }

    summary.model_changed = agent.selection != initial_selection;
    Ok(summary)
}

/// Commands that outlive `/clear`.
fn is_persistent(name: &str) -> bool {
    matches!(name, command::PIN | command::UNPIN | command::TOOLSET)
}

/// Commands seen through the range walk. Only the model and toolset are
/// taken from here; pins come from the agent's own unfiltered history.
fn apply_context_command(agent: &mut Agent, event: &EventRow) {
    let Some(cmd) = CommandPayload::from_data(event.data.as_ref()) else {
        debug!(event_id = event.id, "command event without a name");
        return;
    };
    if cmd.command != command::MODEL && cmd.command != command::TOOLSET {
        return;
    }
    if agent.apply_command(&cmd) == Applied::Ignored {
        debug!(event_id = event.id, command = %cmd.command, "command had no effect on replay");
    }
}

fn own_child_fork(conn: &Connection, agent: &Agent) -> Result<Option<EventRow>, EngineError> {
    if agent.is_root() {
        return Ok(None);
    }
    Ok(events::query_kind(conn, &agent.uuid, EventKind::Fork)?
        .into_iter()
        .find(|e| fork_role(e.data.as_ref()) == Some(ForkRole::Child)))
}

/// Seed pins, toolset and model from the child fork payload. Fields with
/// the wrong shape are skipped.
fn seed_from_fork(agent: &mut Agent, data: Option<&Value>) {
    if let Some(pins) = string_list(data, "pinned_paths") {
        agent.pinned_paths.clear();
        for path in pins {
            let _ = agent.pin(&path);
        }
    }
    if let Some(toolset) = string_list(data, "toolset_filter") {
        agent.set_toolset(toolset);
    }

    let field = |key: &str| data.and_then(|d| d.get(key)).and_then(Value::as_str);
    if let Some(model) = field("model") {
        agent.selection.model = model.to_string();
        if let Some(provider) = field("provider") {
            agent.selection.provider = provider.to_string();
        }
        if let Some(thinking) = field("thinking").and_then(|t| t.parse::<ThinkingLevel>().ok()) {
            agent.selection.thinking = thinking;
        }
    }
}
