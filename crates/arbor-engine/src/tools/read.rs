use std::time::Instant;

use arbor_core::tools::{Tool, ToolContext, ToolError, ToolResult};

use super::resolve_path;

const DEFAULT_LIMIT: usize = 2000;
const MAX_LINE_LEN: usize = 2000;

pub struct ReadTool;

impl Tool for ReadTool {
    fn name(&self) -> &str {
        "Read"
    }

    fn description(&self) -> &str {
        "Read file contents from the filesystem"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["file_path"],
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to read, absolute or relative to the working directory"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read"
                }
            }
        })
    }

    fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let start = Instant::now();

        let file_path = args["file_path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("file_path is required".into()))?;
        let path = resolve_path(file_path, &ctx.working_directory);

        let content = std::fs::read_to_string(&path).map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to read {}: {e}", path.display()))
        })?;

        let offset = args["offset"].as_u64().unwrap_or(1).max(1) as usize;
        let limit = args["limit"].as_u64().map_or(DEFAULT_LIMIT, |n| n as usize);

        let lines: Vec<&str> = content.lines().collect();
        let start_idx = (offset - 1).min(lines.len());
        let end_idx = start_idx.saturating_add(limit).min(lines.len());

        let mut output = String::new();
        for (i, line) in lines[start_idx..end_idx].iter().enumerate() {
            let cut = line
                .char_indices()
                .nth(MAX_LINE_LEN)
                .map_or(line.len(), |(idx, _)| idx);
            output.push_str(&format!("{:>6}\t{}\n", start_idx + i + 1, &line[..cut]));
        }
        if output.is_empty() {
            output = "(empty file)".to_string();
        }

        Ok(ToolResult {
            content: output,
            is_error: false,
            duration: start.elapsed(),
        })
    }
}
