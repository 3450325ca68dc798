use crate::ids::AgentId;

/// One agent as the renderer sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentSummary {
    pub uuid: AgentId,
    pub parent_uuid: Option<AgentId>,
    pub depth: usize,
    pub scrollback_lines: usize,
    pub is_current: bool,
}

/// Snapshot of the live tree handed to the renderer after each mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameView {
    pub agents: Vec<AgentSummary>,
}

impl FrameView {
    pub fn current(&self) -> Option<&AgentSummary> {
        self.agents.iter().find(|a| a.is_current)
    }
}

/// The terminal compositor. Scrollback buffers, layout and viewport math
/// live behind it.
pub trait Renderer: Send + Sync {
    /// Echo one display line into an agent's scrollback surface.
    fn append_display_line(&self, agent: &AgentId, line: &str);

    /// Redraw after the agent tree changed.
    fn render_frame(&self, view: &FrameView);
}

/// Renderer that draws nothing.
#[derive(Clone, Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn append_display_line(&self, _agent: &AgentId, _line: &str) {}

    fn render_frame(&self, _view: &FrameView) {}
}
