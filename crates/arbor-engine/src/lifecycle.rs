//! Agent lifecycle: fork, kill, cascade kill, and the per-agent operations
//! the command loop drives.
//!
//! Every mutation writes the log first and touches the in-memory tree only
//! once the write succeeded. Fork and kill hold the [`ForkBarrier`] for
//! their whole duration; everything else waits for it to clear.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use arbor_core::events::{command, CommandPayload, EventKind, ForkPayload, KillPayload, MarkPayload};
use arbor_core::ids::AgentId;
use arbor_core::messages::Message;
use arbor_core::provider::{LlmReply, ModelSelection, ProviderGateway};
use arbor_core::render::{AgentSummary, Renderer};
use arbor_core::tools::ToolContext;
use arbor_store::{agents, events, AgentRepo, AgentRow, Database, EventRepo, EventRow, StoreError};

use crate::agent::{Agent, Applied};
use crate::barrier::ForkBarrier;
use crate::display::format_event;
use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::replay::replay_agent;
use crate::tools::ToolExecution;
use crate::tree::AgentTree;

/// Shortest partial uuid accepted when naming an agent.
pub const MIN_PREFIX_LEN: usize = 4;

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Used when an agent's conversation carries no system turn.
    pub system_prompt: Option<String>,
    pub default_selection: ModelSelection,
    pub working_directory: PathBuf,
}

/// What the operator sees after a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Done(String),
    /// The command was refused; nothing was written.
    Notice(String),
}

/// Result of a cascade kill.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CascadeReport {
    pub target: AgentId,
    /// Descendants killed with the target, deepest first.
    pub descendants: Vec<AgentId>,
}

impl CascadeReport {
    pub fn count(&self) -> usize {
        self.descendants.len() + 1
    }
}

/// State captured from the parent before the fork transaction.
struct ForkSnapshot {
    pinned_paths: Vec<String>,
    toolset_filter: Vec<String>,
    selection: ModelSelection,
}

struct PersistedFork {
    row: AgentRow,
    parent_event: EventRow,
    child_event: EventRow,
}

struct PersistedCascade {
    descendants: Vec<AgentId>,
    new_current: AgentId,
    event: EventRow,
}

pub struct AgentManager {
    pub(crate) db: Database,
    pub(crate) agents: AgentRepo,
    pub(crate) events: EventRepo,
    pub(crate) tree: Mutex<AgentTree>,
    pub(crate) barrier: Arc<ForkBarrier>,
    pub(crate) gateway: Arc<dyn ProviderGateway>,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) config: ManagerConfig,
    pub(crate) adopted_events: usize,
    /// Tool workers of killed agents, joined at shutdown.
    orphaned_tools: Mutex<Vec<ToolExecution>>,
}

impl AgentManager {
    /// Ensure the root exists and build its (still empty) runtime object.
    /// Call [`AgentManager::restore`] next to load the rest of the tree.
    pub fn new(
        db: Database,
        barrier: Arc<ForkBarrier>,
        gateway: Arc<dyn ProviderGateway>,
        renderer: Arc<dyn Renderer>,
        tools: Arc<ToolRegistry>,
        config: ManagerConfig,
    ) -> Result<Self, EngineError> {
        let agents = AgentRepo::new(db.clone());
        let events = EventRepo::new(db.clone());
        let root = agents.ensure_root()?;
        let tree = AgentTree::new(Agent::from_row(&root.row, config.default_selection.clone()));

        Ok(Self {
            db,
            agents,
            events,
            tree: Mutex::new(tree),
            barrier,
            gateway,
            renderer,
            tools,
            config,
            adopted_events: root.adopted_events,
            orphaned_tools: Mutex::new(Vec::new()),
        })
    }

    /// Lock the live tree. Never hold the guard across an `.await`.
    pub fn tree(&self) -> MutexGuard<'_, AgentTree> {
        self.tree.lock()
    }

    pub fn current_id(&self) -> AgentId {
        self.tree.lock().current_id().clone()
    }

    pub fn root_id(&self) -> AgentId {
        self.tree.lock().root().uuid.clone()
    }

    pub fn list_agents(&self) -> Vec<AgentSummary> {
        self.tree.lock().frame_view().agents
    }

    pub fn render(&self) {
        let view = self.tree.lock().frame_view();
        self.renderer.render_frame(&view);
    }

    /// Echo an event's display lines and append them to the agent's
    /// scrollback.
    pub(crate) fn show(&self, agent: &AgentId, event: &EventRow) {
        let lines = format_event(event);
        for line in &lines {
            self.renderer.append_display_line(agent, line);
        }
        if let Some(a) = self.tree.lock().get_mut(agent) {
            a.push_lines(lines);
        }
    }

    fn record(
        &self,
        agent: &AgentId,
        kind: EventKind,
        content: Option<&str>,
        data: Option<&Value>,
    ) -> Result<EventRow, EngineError> {
        let event = self.events.append(agent, kind, content, data)?;
        self.show(agent, &event);
        Ok(event)
    }

    /// Run blocking database work off the event loop.
    async fn blocking<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Database) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| EngineError::Internal(format!("database task failed: {e}")))?
    }

    // --- Fork ---

    /// Fork a child from the current end of `parent`'s history and make it
    /// current. With a prompt, the prompt is sent to the child; a provider
    /// failure is returned after the fork itself has been persisted.
    #[instrument(skip(self, prompt), fields(agent_uuid = %parent))]
    pub async fn fork(&self, parent: &AgentId, prompt: Option<String>) -> Result<AgentId, EngineError> {
        let _guard = self.barrier.enter().await;

        let snapshot = {
            let tree = self.tree.lock();
            let agent = tree.get(parent).ok_or_else(|| not_live(parent))?;
            ForkSnapshot {
                pinned_paths: agent.pinned_paths.clone(),
                toolset_filter: agent.toolset_filter.clone(),
                selection: agent.selection.clone(),
            }
        };

        let parent_id = parent.clone();
        let persisted = self
            .blocking(move |db| Ok(persist_fork(db, &parent_id, snapshot)?))
            .await?;
        let child_id = persisted.row.uuid.clone();

        {
            let mut tree = self.tree.lock();
            let source = tree
                .get(parent)
                .ok_or_else(|| EngineError::Internal(format!("parent {parent} left the tree mid-fork")))?;
            let mut child = source.fork_child(&persisted.row);
            child.push_lines(format_event(&persisted.child_event));
            tree.push(child);
            let _ = tree.set_current(&child_id);
        }
        self.show(parent, &persisted.parent_event);
        let child_lines = self
            .tree
            .lock()
            .get(&child_id)
            .map(|c| c.scrollback.clone())
            .unwrap_or_default();
        for line in &child_lines {
            self.renderer.append_display_line(&child_id, line);
        }
        self.gateway.invalidate(&child_id);
        info!(
            child = %child_id,
            fork_message_id = persisted.row.fork_message_id,
            "forked agent"
        );
        self.render();

        if let Some(prompt) = prompt {
            self.send_to(&child_id, &prompt)?;
        }
        Ok(child_id)
    }

    // --- Kill ---

    /// Kill one agent. `None` kills the current agent. Its descendants are
    /// left running.
    #[instrument(skip(self))]
    pub async fn kill(&self, target: Option<&str>) -> Result<AgentId, EngineError> {
        let _guard = self.barrier.enter().await;
        let target = self.resolve_target(target)?;
        self.refuse_root(&target)?;

        if self.current_id() == target {
            let live: HashSet<AgentId> = self
                .tree
                .lock()
                .ids()
                .into_iter()
                .filter(|id| id != &target)
                .collect();
            let root = self.root_id();
            let fallback = self
                .db
                .with_conn(|conn| fallback_current(conn, &target, &live, &root))?;
            let _ = self.tree.lock().set_current(&fallback);
        }

        let writer = self.current_id();
        let data = to_data(&KillPayload::by_user(target.clone()))?;
        self.record(&writer, EventKind::AgentKilled, None, Some(&data))?;
        let _ = self.agents.mark_dead(&target)?;

        let removed = self.tree.lock().remove(&target);
        if let Some(agent) = removed {
            self.park_tools(agent);
        }
        info!(agent_uuid = %target, "agent killed");
        self.render();
        Ok(target)
    }

    /// Kill an agent and every live descendant in one transaction. On any
    /// failure nothing is marked dead and the tree is left as it was.
    #[instrument(skip(self))]
    pub async fn kill_cascade(&self, target: Option<&str>) -> Result<CascadeReport, EngineError> {
        let _guard = self.barrier.enter().await;
        let target = self.resolve_target(target)?;
        self.refuse_root(&target)?;

        let (live, current, root) = {
            let tree = self.tree.lock();
            let live: HashSet<AgentId> = tree.ids().into_iter().collect();
            (live, tree.current_id().clone(), tree.root().uuid.clone())
        };

        let victim = target.clone();
        let persisted = self
            .blocking(move |db| Ok(persist_cascade(db, &victim, &current, &live, &root)?))
            .await?;

        let removed: Vec<Agent> = {
            let mut tree = self.tree.lock();
            let _ = tree.set_current(&persisted.new_current);
            persisted
                .descendants
                .iter()
                .chain(std::iter::once(&target))
                .filter_map(|id| tree.remove(id))
                .collect()
        };
        for agent in removed {
            self.park_tools(agent);
        }
        self.show(&persisted.new_current, &persisted.event);

        let report = CascadeReport {
            target,
            descendants: persisted.descendants,
        };
        info!(agent_uuid = %report.target, count = report.count(), "cascade kill");
        self.render();
        Ok(report)
    }

    fn park_tools(&self, mut agent: Agent) {
        if agent.tool_runs.is_empty() {
            return;
        }
        self.orphaned_tools.lock().append(&mut agent.tool_runs);
    }

    fn refuse_root(&self, target: &AgentId) -> Result<(), EngineError> {
        if self.tree.lock().root().uuid == *target {
            return Err(EngineError::InvalidArgument(
                "the root agent cannot be killed".into(),
            ));
        }
        Ok(())
    }

    fn resolve_target(&self, target: Option<&str>) -> Result<AgentId, EngineError> {
        match target {
            Some(prefix) => self.resolve(prefix),
            None => Ok(self.current_id()),
        }
    }

    /// Resolve a partial uuid among live agents. An exact match wins over
    /// longer ids sharing the prefix.
    pub fn resolve(&self, prefix: &str) -> Result<AgentId, EngineError> {
        let prefix = prefix.trim();
        if prefix.chars().count() < MIN_PREFIX_LEN {
            return Err(EngineError::InvalidArgument(format!(
                "agent id '{prefix}' is too short, give at least {MIN_PREFIX_LEN} characters"
            )));
        }

        let candidates = self.agents.find_running_by_prefix(prefix)?;
        let live: Vec<AgentId> = {
            let tree = self.tree.lock();
            candidates
                .into_iter()
                .map(|row| row.uuid)
                .filter(|id| tree.contains(id))
                .collect()
        };

        if let Some(exact) = live.iter().find(|id| id.as_str() == prefix) {
            return Ok(exact.clone());
        }
        match live.as_slice() {
            [] => Err(StoreError::NotFound(format!("no live agent matches '{prefix}'")).into()),
            [only] => Ok(only.clone()),
            many => Err(EngineError::InvalidArgument(format!(
                "'{prefix}' is ambiguous, it matches {} agents",
                many.len()
            ))),
        }
    }

    // --- Per-agent operations ---

    /// Make another live agent current.
    pub async fn switch(&self, prefix: &str) -> Result<AgentId, EngineError> {
        self.barrier.wait_clear().await;
        let id = self.resolve(prefix)?;
        let _ = self.tree.lock().set_current(&id);
        self.render();
        Ok(id)
    }

    /// Send operator input to the current agent.
    pub async fn send_user_message(&self, text: &str) -> Result<(), EngineError> {
        self.barrier.wait_clear().await;
        let id = self.current_id();
        self.send_to(&id, text)
    }

    #[instrument(skip(self, text), fields(agent_uuid = %agent))]
    pub(crate) fn send_to(&self, agent: &AgentId, text: &str) -> Result<(), EngineError> {
        if !self.tree.lock().contains(agent) {
            return Err(not_live(agent));
        }
        let _ = self.record(agent, EventKind::User, Some(text), None)?;

        let request = {
            let mut tree = self.tree.lock();
            let a = tree.get_mut(agent).ok_or_else(|| not_live(agent))?;
            a.conversation.push(Message::user_text(text));
            a.llm_request(
                self.config.system_prompt.as_deref(),
                self.tools.visible(&a.toolset_filter),
            )
        };
        self.render();

        self.gateway
            .start_call(agent, request)
            .map_err(|e| EngineError::ProviderUnavailable(e.to_string()))?;
        if let Some(a) = self.tree.lock().get_mut(agent) {
            a.awaiting_reply = true;
        }
        Ok(())
    }

    /// Reset the current agent's visible history. Pins and toolset are
    /// kept; the model returns to the one the agent was forked with. The
    /// agent is replayed from the log so live state matches a restart.
    pub async fn clear(&self) -> Result<(), EngineError> {
        self.barrier.wait_clear().await;
        let id = self.current_id();
        let _ = self.events.append(&id, EventKind::Clear, None, None)?;
        let summary = {
            let mut tree = self.tree.lock();
            let agent = tree.get_mut(&id).ok_or_else(|| not_live(&id))?;
            self.db.with_conn(|conn| Ok(replay_agent(conn, agent)))??
        };
        if summary.model_changed {
            self.gateway.invalidate(&id);
        }
        self.render();
        Ok(())
    }

    /// Run `/pin`, `/unpin`, `/toolset` or `/model` on the current agent.
    /// Without args the current value is reported and nothing is written.
    pub async fn run_command(&self, name: &str, args: Option<&str>) -> Result<CommandOutcome, EngineError> {
        self.barrier.wait_clear().await;
        let id = self.current_id();
        let args = args.map(str::trim).filter(|a| !a.is_empty());

        let Some(args) = args else {
            return self.describe(&id, name);
        };
        if name == command::MODEL {
            let selection = self
                .tree
                .lock()
                .get(&id)
                .map(|a| a.selection.clone())
                .ok_or_else(|| not_live(&id))?;
            selection
                .apply_spec(args)
                .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        } else if ![command::PIN, command::UNPIN, command::TOOLSET].contains(&name) {
            return Err(EngineError::InvalidArgument(format!("unknown command: /{name}")));
        }

        let payload = CommandPayload::new(name, Some(args.to_string()));
        let _ = self.record(&id, EventKind::Command, None, Some(&to_data(&payload)?))?;

        let (applied, message) = {
            let mut tree = self.tree.lock();
            let agent = tree.get_mut(&id).ok_or_else(|| not_live(&id))?;
            let applied = agent.apply_command(&payload);
            let message = match applied {
                Applied::Model => format!(
                    "model: {}/{} ({})",
                    agent.selection.provider, agent.selection.model, agent.selection.thinking
                ),
                Applied::Toolset => format!("toolset: {}", list_or(&agent.toolset_filter, "all tools")),
                _ => format!("pinned: {}", list_or(&agent.pinned_paths, "nothing")),
            };
            (applied, message)
        };
        if applied == Applied::Model {
            self.gateway.invalidate(&id);
        }
        self.render();
        Ok(CommandOutcome::Done(message))
    }

    fn describe(&self, id: &AgentId, name: &str) -> Result<CommandOutcome, EngineError> {
        let tree = self.tree.lock();
        let agent = tree.get(id).ok_or_else(|| not_live(id))?;
        let message = match name {
            command::PIN | command::UNPIN => format!("pinned: {}", list_or(&agent.pinned_paths, "nothing")),
            command::TOOLSET => format!("toolset: {}", list_or(&agent.toolset_filter, "all tools")),
            command::MODEL => format!(
                "model: {}/{} ({})",
                agent.selection.provider, agent.selection.model, agent.selection.thinking
            ),
            other => return Err(EngineError::InvalidArgument(format!("unknown command: /{other}"))),
        };
        Ok(CommandOutcome::Notice(message))
    }

    /// Bookmark the current end of the current agent's history.
    pub async fn mark(&self, label: Option<&str>) -> Result<CommandOutcome, EngineError> {
        self.barrier.wait_clear().await;
        let id = self.current_id();
        let payload = MarkPayload {
            label: label.map(str::to_owned),
        };
        let event = self.record(&id, EventKind::Mark, None, Some(&to_data(&payload)?))?;
        if let Some(agent) = self.tree.lock().get_mut(&id) {
            agent.marks.push(crate::marks::Mark {
                event_id: event.id,
                label: payload.label,
            });
        }
        self.render();
        Ok(CommandOutcome::Done(format!("mark #{}", event.id)))
    }

    /// Pop the mark stack back to a mark. Only the stack is affected.
    pub async fn rewind(&self, label: Option<&str>) -> Result<CommandOutcome, EngineError> {
        self.barrier.wait_clear().await;
        let id = self.current_id();
        let exists = {
            let tree = self.tree.lock();
            let agent = tree.get(&id).ok_or_else(|| not_live(&id))?;
            match label {
                Some(l) => agent.marks.iter().any(|m| m.label.as_deref() == Some(l)),
                None => !agent.marks.is_empty(),
            }
        };
        if !exists {
            return Err(EngineError::InvalidArgument(match label {
                Some(l) => format!("no mark named '{l}'"),
                None => "no marks to rewind to".into(),
            }));
        }

        let payload = MarkPayload {
            label: label.map(str::to_owned),
        };
        let _ = self.record(&id, EventKind::Rewind, None, Some(&to_data(&payload)?))?;
        let mark = self
            .tree
            .lock()
            .get_mut(&id)
            .and_then(|agent| agent.marks.rewind(label));
        self.render();
        Ok(CommandOutcome::Done(match mark {
            Some(m) => format!("rewound to mark #{}", m.event_id),
            None => "rewound".into(),
        }))
    }

    // --- Main loop ---

    /// Collect finished LLM calls and tool runs. Skipped while a fork or
    /// kill holds the barrier. Returns whether anything changed.
    pub fn tick(&self) -> Result<bool, EngineError> {
        if self.barrier.is_set() {
            return Ok(false);
        }
        let ids = self.tree.lock().ids();
        let mut changed = false;
        for id in ids {
            changed |= self.poll_reply(&id)?;
            changed |= self.poll_tools(&id)?;
        }
        if changed {
            self.render();
        }
        Ok(changed)
    }

    fn poll_reply(&self, id: &AgentId) -> Result<bool, EngineError> {
        let awaiting = self.tree.lock().get(id).is_some_and(|a| a.awaiting_reply);
        if !awaiting {
            return Ok(false);
        }
        let Some(reply) = self.gateway.poll_reply(id) else {
            return Ok(false);
        };
        if let Some(agent) = self.tree.lock().get_mut(id) {
            agent.awaiting_reply = false;
        }

        match reply {
            Ok(reply) => self.record_reply(id, reply)?,
            Err(e) => {
                warn!(agent_uuid = %id, error = %e, kind = e.error_kind(), "llm call failed");
                let _ = self.record(id, EventKind::Interrupted, Some(&e.to_string()), None)?;
            }
        }
        Ok(true)
    }

    fn record_reply(&self, id: &AgentId, reply: LlmReply) -> Result<(), EngineError> {
        if let Some(text) = reply.text.as_deref() {
            let _ = self.record(id, EventKind::Assistant, Some(text), None)?;
            if let Some(agent) = self.tree.lock().get_mut(id) {
                agent.conversation.push(Message::assistant_text(text));
            }
        }
        if let Some(usage) = reply.usage {
            let _ = self.record(id, EventKind::Usage, None, Some(&to_data(&usage)?))?;
        }

        for call in reply.tool_calls {
            let data = json!({
                "tool_call_id": call.id,
                "name": call.name,
                "arguments": call.arguments,
            });
            let _ = self.record(id, EventKind::ToolCall, None, Some(&data))?;

            let (filter, pinned) = {
                let tree = self.tree.lock();
                let agent = tree.get(id).ok_or_else(|| not_live(id))?;
                (agent.toolset_filter.clone(), agent.pinned_paths.clone())
            };
            let run = match self.tools.resolve(&call.name, &filter) {
                Ok(tool) => ToolExecution::spawn(
                    tool,
                    call.arguments,
                    ToolContext {
                        agent_id: id.clone(),
                        tool_call_id: call.id,
                        working_directory: self.config.working_directory.clone(),
                        pinned_paths: pinned,
                    },
                )?,
                Err(e) => {
                    debug!(agent_uuid = %id, tool = %call.name, error = %e, "tool call refused");
                    ToolExecution::finished(call.id, call.name, &e)
                }
            };
            if let Some(agent) = self.tree.lock().get_mut(id) {
                agent.tool_runs.push(run);
            }
        }
        Ok(())
    }

    fn poll_tools(&self, id: &AgentId) -> Result<bool, EngineError> {
        let finished = {
            let mut tree = self.tree.lock();
            let Some(agent) = tree.get_mut(id) else {
                return Ok(false);
            };
            let mut finished = Vec::new();
            agent.tool_runs.retain_mut(|run| match run.poll() {
                Some(result) => {
                    finished.push((run.call_id.clone(), run.tool_name.clone(), result));
                    false
                }
                None => true,
            });
            finished
        };

        let changed = !finished.is_empty();
        for (call_id, name, result) in finished {
            let data = json!({
                "tool_call_id": call_id,
                "name": name,
                "is_error": result.is_error,
                "duration_ms": result.duration.as_millis() as u64,
            });
            let _ = self.record(id, EventKind::ToolResult, Some(&result.content), Some(&data))?;
        }
        Ok(changed)
    }

    /// Join every tool worker. Results that arrive are still logged.
    pub fn shutdown(&self) {
        let mut runs: Vec<(AgentId, ToolExecution)> = Vec::new();
        {
            let mut tree = self.tree.lock();
            for agent in tree.iter_mut() {
                let id = agent.uuid.clone();
                runs.extend(agent.tool_runs.drain(..).map(|r| (id.clone(), r)));
            }
        }
        let orphaned = std::mem::take(&mut *self.orphaned_tools.lock());

        let total = runs.len() + orphaned.len();
        if total > 0 {
            info!(count = total, "waiting for tool workers");
        }
        for (id, run) in runs {
            let (call_id, name) = (run.call_id.clone(), run.tool_name.clone());
            if let Some(result) = run.join() {
                let data = json!({
                    "tool_call_id": call_id,
                    "name": name,
                    "is_error": result.is_error,
                    "duration_ms": result.duration.as_millis() as u64,
                });
                if let Err(e) = self.events.append(&id, EventKind::ToolResult, Some(&result.content), Some(&data)) {
                    warn!(agent_uuid = %id, error = %e, "failed to record tool result at shutdown");
                }
            }
        }
        for run in orphaned {
            let _ = run.join();
        }
    }
}

fn not_live(id: &AgentId) -> EngineError {
    EngineError::InvalidArgument(format!("agent {} is not live", id.short()))
}

fn list_or(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join(", ")
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    Ok(serde_json::to_value(value).map_err(StoreError::from)?)
}

/// Insert the child row and write the linked fork pair atomically.
fn persist_fork(db: &Database, parent: &AgentId, snapshot: ForkSnapshot) -> Result<PersistedFork, StoreError> {
    db.transaction(|tx| {
        let fork_message_id = agents::get_last_event_id(tx, parent)?;
        let row = AgentRow::new_child(parent, fork_message_id);
        agents::insert(tx, &row)?;

        let parent_payload = ForkPayload::Parent {
            child_uuid: row.uuid.clone(),
            fork_message_id,
        };
        let parent_event = events::append(
            tx,
            parent,
            EventKind::Fork,
            None,
            Some(&serde_json::to_value(&parent_payload)?),
        )?;

        let child_payload = ForkPayload::Child {
            parent_uuid: parent.clone(),
            fork_message_id,
            pinned_paths: snapshot.pinned_paths,
            toolset_filter: snapshot.toolset_filter,
            provider: snapshot.selection.provider,
            model: snapshot.selection.model,
            thinking: snapshot.selection.thinking,
        };
        let child_event = events::append(
            tx,
            &row.uuid,
            EventKind::Fork,
            None,
            Some(&serde_json::to_value(&child_payload)?),
        )?;

        Ok(PersistedFork {
            row,
            parent_event,
            child_event,
        })
    })
}

/// Mark the target and its live descendants dead and write one kill event,
/// all in one transaction.
fn persist_cascade(
    db: &Database,
    target: &AgentId,
    current: &AgentId,
    live: &HashSet<AgentId>,
    root: &AgentId,
) -> Result<PersistedCascade, StoreError> {
    db.transaction(|tx| {
        let descendants: Vec<AgentId> = agents::running_descendants(tx, target)?
            .into_iter()
            .map(|row| row.uuid)
            .collect();
        for id in &descendants {
            let _ = agents::mark_dead(tx, id)?;
        }
        let _ = agents::mark_dead(tx, target)?;

        let doomed: HashSet<&AgentId> = descendants.iter().chain(std::iter::once(target)).collect();
        let new_current = if doomed.contains(current) {
            let survivors: HashSet<AgentId> = live
                .iter()
                .filter(|id| !doomed.contains(id))
                .cloned()
                .collect();
            fallback_current(tx, target, &survivors, root)?
        } else {
            current.clone()
        };

        let payload = KillPayload::cascade_by_user(target.clone(), descendants.len() + 1);
        let event = events::append(
            tx,
            &new_current,
            EventKind::AgentKilled,
            None,
            Some(&serde_json::to_value(&payload)?),
        )?;

        Ok(PersistedCascade {
            descendants,
            new_current,
            event,
        })
    })
}

/// Nearest registry ancestor of `target` that is still live, else the root.
fn fallback_current(
    conn: &Connection,
    target: &AgentId,
    live: &HashSet<AgentId>,
    root: &AgentId,
) -> Result<AgentId, StoreError> {
    let mut seen = HashSet::new();
    let mut cursor = agents::get_parent(conn, target)?;
    while let Some(row) = cursor {
        if !seen.insert(row.uuid.clone()) {
            break;
        }
        if live.contains(&row.uuid) {
            return Ok(row.uuid);
        }
        cursor = agents::get_parent(conn, &row.uuid)?;
    }
    Ok(root.clone())
}
