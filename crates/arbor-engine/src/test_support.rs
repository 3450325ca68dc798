//! Recording fakes for the provider and renderer collaborators.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use arbor_core::errors::ProviderError;
use arbor_core::ids::AgentId;
use arbor_core::provider::{LlmReply, LlmRequest, ModelSelection, ProviderGateway, ThinkingLevel};
use arbor_core::render::{FrameView, Renderer};
use arbor_store::Database;

use crate::barrier::ForkBarrier;
use crate::lifecycle::{AgentManager, ManagerConfig};
use crate::tools::create_default_registry;

#[derive(Default)]
pub struct RecordingGateway {
    pub invalidated: Mutex<Vec<AgentId>>,
    pub calls: Mutex<Vec<(AgentId, LlmRequest)>>,
    pub replies: Mutex<HashMap<AgentId, VecDeque<Result<LlmReply, ProviderError>>>>,
    pub refuse: AtomicBool,
}

impl RecordingGateway {
    pub fn queue_reply(&self, agent: &AgentId, reply: Result<LlmReply, ProviderError>) {
        self.replies.lock().entry(agent.clone()).or_default().push_back(reply);
    }

    pub fn was_invalidated(&self, agent: &AgentId) -> bool {
        self.invalidated.lock().contains(agent)
    }
}

impl ProviderGateway for RecordingGateway {
    fn invalidate(&self, agent: &AgentId) {
        self.invalidated.lock().push(agent.clone());
    }

    fn start_call(&self, agent: &AgentId, request: LlmRequest) -> Result<(), ProviderError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("offline".into()));
        }
        self.calls.lock().push((agent.clone(), request));
        Ok(())
    }

    fn poll_reply(&self, agent: &AgentId) -> Option<Result<LlmReply, ProviderError>> {
        self.replies.lock().get_mut(agent)?.pop_front()
    }
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub frames: Mutex<Vec<FrameView>>,
    pub lines: Mutex<Vec<(AgentId, String)>>,
}

impl RecordingRenderer {
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn lines_for(&self, agent: &AgentId) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, l)| l.clone())
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn append_display_line(&self, agent: &AgentId, line: &str) {
        self.lines.lock().push((agent.clone(), line.to_string()));
    }

    fn render_frame(&self, view: &FrameView) {
        self.frames.lock().push(view.clone());
    }
}

pub struct Harness {
    pub db: Database,
    pub manager: AgentManager,
    pub gateway: Arc<RecordingGateway>,
    pub renderer: Arc<RecordingRenderer>,
}

pub fn config(system_prompt: Option<&str>) -> ManagerConfig {
    ManagerConfig {
        system_prompt: system_prompt.map(str::to_owned),
        default_selection: ModelSelection::new("anthropic", "claude-sonnet-4-5", ThinkingLevel::Med),
        working_directory: PathBuf::from("."),
    }
}

/// A manager over `db`, as a fresh process would build it. Restoration is
/// left to the test.
pub fn harness_on(db: Database, system_prompt: Option<&str>) -> Harness {
    let gateway = Arc::new(RecordingGateway::default());
    let renderer = Arc::new(RecordingRenderer::default());
    let manager = AgentManager::new(
        db.clone(),
        Arc::new(ForkBarrier::new()),
        gateway.clone(),
        renderer.clone(),
        Arc::new(create_default_registry()),
        config(system_prompt),
    )
    .unwrap();
    Harness {
        db,
        manager,
        gateway,
        renderer,
    }
}

/// Fresh in-memory database, restored.
pub fn harness() -> Harness {
    let h = harness_on(Database::in_memory().unwrap(), None);
    h.manager.restore().unwrap();
    h
}

/// Simulate a restart: a new manager on the same database, restored.
pub fn restart(h: &Harness) -> Harness {
    let next = harness_on(h.db.clone(), None);
    next.manager.restore().unwrap();
    next
}
