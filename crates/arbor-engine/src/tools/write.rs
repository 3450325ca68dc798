use std::time::Instant;

use arbor_core::tools::{Tool, ToolContext, ToolError, ToolResult};

use super::resolve_path;

pub struct WriteTool;

impl Tool for WriteTool {
    fn name(&self) -> &str {
        "Write"
    }

    fn description(&self) -> &str {
        "Write content to a file on the filesystem"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["file_path", "content"],
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to write, absolute or relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            }
        })
    }

    fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let start = Instant::now();

        let file_path = args["file_path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("file_path is required".into()))?;
        let content = args["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("content is required".into()))?;

        let path = resolve_path(file_path, &ctx.working_directory);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ToolError::ExecutionFailed(format!("failed to create directory: {e}"))
            })?;
        }
        std::fs::write(&path, content).map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to write {}: {e}", path.display()))
        })?;

        Ok(ToolResult {
            content: format!(
                "Wrote {} bytes ({} lines) to {}",
                content.len(),
                content.lines().count(),
                path.display()
            ),
            is_error: false,
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use arbor_core::ids::{AgentId, ToolCallId};

    use super::*;

    fn test_ctx(dir: &Path) -> ToolContext {
        ToolContext {
            agent_id: AgentId::new(),
            tool_call_id: ToolCallId::new(),
            working_directory: dir.to_path_buf(),
            pinned_paths: Vec::new(),
        }
    }

    #[test]
    fn write_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = WriteTool
            .execute(
                serde_json::json!({ "file_path": "output.txt", "content": "hello world\n" }),
                &test_ctx(dir.path()),
            )
            .unwrap();

        assert!(!result.is_error);
        assert!(result.content.contains("12 bytes"));
        assert_eq!(
            fs::read_to_string(dir.path().join("output.txt")).unwrap(),
            "hello world\n"
        );
    }

    #[test]
    fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c/file.txt");
        WriteTool
            .execute(
                serde_json::json!({ "file_path": target.to_str().unwrap(), "content": "nested" }),
                &test_ctx(dir.path()),
            )
            .unwrap();
        assert_eq!(fs::read_to_string(target).unwrap(), "nested");
    }

    #[test]
    fn content_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let err = WriteTool
            .execute(serde_json::json!({ "file_path": "x" }), &test_ctx(dir.path()))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
