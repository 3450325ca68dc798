use std::collections::HashMap;
use std::sync::Arc;

use arbor_core::tools::{Tool, ToolDefinition, ToolError};

/// Whether `name` passes an agent's toolset filter. An empty filter allows
/// every tool.
pub fn filter_allows(filter: &[String], name: &str) -> bool {
    filter.is_empty() || filter.iter().any(|f| f == name)
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let _ = self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for the LLM, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.visible(&[])
    }

    /// Definitions of the tools an agent with this toolset filter may call.
    pub fn visible(&self, filter: &[String]) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .iter()
            .filter(|(name, _)| filter_allows(filter, name))
            .map(|(_, tool)| tool.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Look up a tool the model asked for, honouring the filter.
    pub fn resolve(&self, name: &str, filter: &[String]) -> Result<Arc<dyn Tool>, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        if !filter_allows(filter, name) {
            return Err(ToolError::Filtered(name.to_string()));
        }
        Ok(tool)
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use arbor_core::tools::{ToolContext, ToolResult};

    use super::*;

    struct DummyTool {
        name: String,
    }

    impl DummyTool {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    impl Tool for DummyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A dummy tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult {
                content: "ok".into(),
                is_error: false,
                duration: std::time::Duration::from_millis(1),
            })
        }
    }

    fn registry(names: &[&str]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for name in names {
            registry.register(Arc::new(DummyTool::new(name)));
        }
        registry
    }

    #[test]
    fn register_and_get() {
        let registry = registry(&["Read"]);
        assert!(registry.contains("Read"));
        assert!(!registry.contains("Write"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("Read").is_some());
    }

    #[test]
    fn names_sorted() {
        let registry = registry(&["Grep", "Bash", "Read"]);
        assert_eq!(registry.names(), vec!["Bash", "Grep", "Read"]);
    }

    #[test]
    fn empty_filter_shows_everything() {
        let registry = registry(&["Write", "Read"]);
        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "Read");
        assert_eq!(defs[1].name, "Write");
    }

    #[test]
    fn filter_limits_visible_tools() {
        let registry = registry(&["Read", "Write", "Bash"]);
        let filter = vec!["Read".to_string(), "Missing".to_string()];
        let defs = registry.visible(&filter);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "Read");
    }

    #[test]
    fn resolve_distinguishes_unknown_and_filtered() {
        let registry = registry(&["Read", "Write"]);
        let filter = vec!["Read".to_string()];
        assert!(registry.resolve("Read", &filter).is_ok());
        assert_eq!(
            registry.resolve("Write", &filter).err(),
            Some(ToolError::Filtered("Write".into()))
        );
        assert_eq!(
            registry.resolve("Bash", &[]).err(),
            Some(ToolError::UnknownTool("Bash".into()))
        );
    }
}
