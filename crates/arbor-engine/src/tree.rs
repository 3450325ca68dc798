//! The live agent tree. Owns every runtime [`Agent`]; the root is never
//! removed and there is always a current agent.

use arbor_core::ids::AgentId;
use arbor_core::render::{AgentSummary, FrameView};

use crate::agent::Agent;

#[derive(Debug)]
pub struct AgentTree {
    agents: Vec<Agent>,
    current: AgentId,
}

impl AgentTree {
    pub fn new(root: Agent) -> Self {
        Self {
            current: root.uuid.clone(),
            agents: vec![root],
        }
    }

    pub fn root(&self) -> &Agent {
        &self.agents[0]
    }

    pub fn root_mut(&mut self) -> &mut Agent {
        &mut self.agents[0]
    }

    pub fn get(&self, uuid: &AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| &a.uuid == uuid)
    }

    pub fn get_mut(&mut self, uuid: &AgentId) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| &a.uuid == uuid)
    }

    pub fn contains(&self, uuid: &AgentId) -> bool {
        self.get(uuid).is_some()
    }

    pub fn current_id(&self) -> &AgentId {
        &self.current
    }

    pub fn current(&self) -> &Agent {
        self.get(&self.current).unwrap_or_else(|| self.root())
    }

    /// Returns false if the agent is not in the tree.
    pub fn set_current(&mut self, uuid: &AgentId) -> bool {
        if self.contains(uuid) {
            self.current = uuid.clone();
            true
        } else {
            false
        }
    }

    pub fn push(&mut self, agent: Agent) {
        self.agents.push(agent);
    }

    /// Remove and return an agent. The root cannot be removed. Removing the
    /// current agent moves current to the root.
    pub fn remove(&mut self, uuid: &AgentId) -> Option<Agent> {
        let idx = self.agents.iter().position(|a| &a.uuid == uuid)?;
        if idx == 0 {
            return None;
        }
        let agent = self.agents.remove(idx);
        if &self.current == uuid {
            self.current = self.agents[0].uuid.clone();
        }
        Some(agent)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents.iter_mut()
    }

    pub fn ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|a| a.uuid.clone()).collect()
    }

    /// Distance from the root through live parents. An agent whose parent
    /// is not in the tree hangs directly under the root.
    pub fn depth(&self, uuid: &AgentId) -> usize {
        let mut depth = 0;
        let mut cursor = self.get(uuid);
        while let Some(agent) = cursor {
            let Some(parent) = agent.parent_uuid.as_ref() else {
                return depth;
            };
            depth += 1;
            if depth > self.agents.len() {
                break;
            }
            cursor = self.get(parent);
        }
        depth.max(1)
    }

    pub fn frame_view(&self) -> FrameView {
        FrameView {
            agents: self
                .agents
                .iter()
                .map(|a| AgentSummary {
                    uuid: a.uuid.clone(),
                    parent_uuid: a.parent_uuid.clone(),
                    depth: self.depth(&a.uuid),
                    scrollback_lines: a.scrollback.len(),
                    is_current: a.uuid == self.current,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use arbor_core::provider::{ModelSelection, ThinkingLevel};
    use arbor_store::AgentRow;

    use super::*;

    fn sel() -> ModelSelection {
        ModelSelection::new("anthropic", "claude-sonnet-4-5", ThinkingLevel::Med)
    }

    fn tree() -> (AgentTree, AgentId) {
        let root = Agent::from_row(&AgentRow::new_root(), sel());
        let id = root.uuid.clone();
        (AgentTree::new(root), id)
    }

    fn child(tree: &mut AgentTree, parent: &AgentId) -> AgentId {
        let agent = Agent::from_row(&AgentRow::new_child(parent, 1), sel());
        let id = agent.uuid.clone();
        tree.push(agent);
        id
    }

    #[test]
    fn root_is_current_and_cannot_be_removed() {
        let (mut tree, root) = tree();
        assert_eq!(tree.current_id(), &root);
        assert!(tree.remove(&root).is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn removing_current_falls_back_to_root() {
        let (mut tree, root) = tree();
        let a = child(&mut tree, &root);
        assert!(tree.set_current(&a));
        assert!(tree.remove(&a).is_some());
        assert_eq!(tree.current_id(), &root);
        assert!(!tree.set_current(&a));
    }

    #[test]
    fn depth_follows_live_parents() {
        let (mut tree, root) = tree();
        let a = child(&mut tree, &root);
        let b = child(&mut tree, &a);
        assert_eq!(tree.depth(&root), 0);
        assert_eq!(tree.depth(&a), 1);
        assert_eq!(tree.depth(&b), 2);

        let orphan = child(&mut tree, &AgentId::new());
        assert_eq!(tree.depth(&orphan), 1);
    }

    #[test]
    fn frame_view_marks_current() {
        let (mut tree, root) = tree();
        let a = child(&mut tree, &root);
        tree.set_current(&a);
        let view = tree.frame_view();
        assert_eq!(view.agents.len(), 2);
        assert_eq!(view.current().map(|s| &s.uuid), Some(&a));
        assert_eq!(view.current().map(|s| s.depth), Some(1));
    }
}
