//! In-memory runtime state of one live agent.

use arbor_core::events::{command, CommandPayload};
use arbor_core::ids::{AgentId, EventId};
use arbor_core::messages::{Message, Role};
use arbor_core::provider::{LlmRequest, ModelSelection, ModelSpecError};
use arbor_core::tools::ToolDefinition;
use arbor_store::AgentRow;

use crate::marks::MarkStack;
use crate::registry::filter_allows;
use crate::tools::ToolExecution;

/// What applying a command changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Ignored,
    Pins,
    Toolset,
    Model,
}

#[derive(Debug)]
pub struct Agent {
    pub uuid: AgentId,
    pub parent_uuid: Option<AgentId>,
    pub fork_message_id: EventId,
    pub created_at: i64,
    pub conversation: Vec<Message>,
    pub scrollback: Vec<String>,
    pub pinned_paths: Vec<String>,
    pub toolset_filter: Vec<String>,
    pub selection: ModelSelection,
    /// Selection replay starts from before any `model` command applies.
    pub(crate) base_selection: ModelSelection,
    pub marks: MarkStack,
    pub(crate) tool_runs: Vec<ToolExecution>,
    pub(crate) awaiting_reply: bool,
}

impl Agent {
    pub fn from_row(row: &AgentRow, selection: ModelSelection) -> Self {
        Self {
            uuid: row.uuid.clone(),
            parent_uuid: row.parent_uuid.clone(),
            fork_message_id: row.fork_message_id,
            created_at: row.created_at,
            conversation: Vec::new(),
            scrollback: Vec::new(),
            pinned_paths: Vec::new(),
            toolset_filter: Vec::new(),
            base_selection: selection.clone(),
            selection,
            marks: MarkStack::new(),
            tool_runs: Vec::new(),
            awaiting_reply: false,
        }
    }

    /// A child created at the current end of this agent's history. Visible
    /// state is copied; in-flight work is not.
    pub fn fork_child(&self, row: &AgentRow) -> Self {
        Self {
            conversation: self.conversation.clone(),
            scrollback: self.scrollback.clone(),
            pinned_paths: self.pinned_paths.clone(),
            toolset_filter: self.toolset_filter.clone(),
            marks: self.marks.clone(),
            ..Self::from_row(row, self.selection.clone())
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_uuid.is_none()
    }

    /// Drop everything replay rebuilds. The selection falls back to the one
    /// the agent was created or forked with.
    pub(crate) fn reset_replayed_state(&mut self) {
        self.selection = self.base_selection.clone();
        self.conversation.clear();
        self.scrollback.clear();
        self.pinned_paths.clear();
        self.toolset_filter.clear();
        self.marks = MarkStack::new();
    }

    /// Returns false if the path was already pinned.
    pub fn pin(&mut self, path: &str) -> bool {
        let path = path.trim();
        if path.is_empty() || self.pinned_paths.iter().any(|p| p == path) {
            return false;
        }
        self.pinned_paths.push(path.to_string());
        true
    }

    /// Returns false if the path was not pinned.
    pub fn unpin(&mut self, path: &str) -> bool {
        let path = path.trim();
        let before = self.pinned_paths.len();
        self.pinned_paths.retain(|p| p != path);
        self.pinned_paths.len() != before
    }

    /// Replace, not merge, the toolset filter.
    pub fn set_toolset(&mut self, names: Vec<String>) {
        self.toolset_filter = names;
    }

    pub fn tool_allowed(&self, name: &str) -> bool {
        filter_allows(&self.toolset_filter, name)
    }

    /// Apply a `[provider/]model[/thinking]` spec. Returns whether the
    /// selection changed.
    pub fn set_model(&mut self, spec: &str) -> Result<bool, ModelSpecError> {
        let next = self.selection.apply_spec(spec)?;
        let changed = next != self.selection;
        self.selection = next;
        Ok(changed)
    }

    /// Re-apply the side effect of a stored or freshly issued command.
    /// Null args, unknown names and bad model specs are ignored.
    pub fn apply_command(&mut self, cmd: &CommandPayload) -> Applied {
        let Some(args) = cmd.args.as_deref() else {
            return Applied::Ignored;
        };
        match cmd.command.as_str() {
            command::PIN => {
                let _ = self.pin(args);
                Applied::Pins
            }
            command::UNPIN => {
                let _ = self.unpin(args);
                Applied::Pins
            }
            command::TOOLSET => {
                self.set_toolset(parse_toolset(args));
                Applied::Toolset
            }
            command::MODEL => match self.set_model(args) {
                Ok(_) => Applied::Model,
                Err(_) => Applied::Ignored,
            },
            _ => Applied::Ignored,
        }
    }

    pub fn push_lines(&mut self, lines: impl IntoIterator<Item = String>) {
        self.scrollback.extend(lines);
    }

    pub fn has_running_tools(&self) -> bool {
        !self.tool_runs.is_empty()
    }

    /// Build the next LLM request. System turns in the conversation become
    /// the system prompt; `fallback_prompt` is used when there are none.
    pub fn llm_request(&self, fallback_prompt: Option<&str>, tools: Vec<ToolDefinition>) -> LlmRequest {
        let system: Vec<&str> = self
            .conversation
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text.as_str())
            .collect();
        let system_prompt = if system.is_empty() {
            fallback_prompt.map(str::to_owned)
        } else {
            Some(system.join("\n\n"))
        };
        LlmRequest {
            selection: self.selection.clone(),
            system_prompt,
            messages: self
                .conversation
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned()
                .collect(),
            tools,
        }
    }
}

/// Split toolset args on commas and whitespace, dropping empty names.
pub fn parse_toolset(args: &str) -> Vec<String> {
    args.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
