//! Scrollback rendering of stored events. Every kind produces at least one
//! line so the operator sees bookkeeping events too.

use serde_json::Value;

use arbor_core::events::{fork_role, CommandPayload, EventKind, ForkRole, MarkPayload};
use arbor_core::ids::AgentId;
use arbor_store::EventRow;

/// Longest tool output echoed into scrollback, in lines.
const TOOL_RESULT_LINES: usize = 8;

pub fn format_event(event: &EventRow) -> Vec<String> {
    let content = event.content.as_deref().unwrap_or("");
    let data = event.data.as_ref();
    match event.kind {
        EventKind::User => prefixed("> ", content),
        EventKind::Assistant => prefixed("", content),
        EventKind::System => prefixed("[system] ", content),
        EventKind::ToolCall => {
            let name = str_field(data, "name").unwrap_or(content);
            let args = data
                .and_then(|d| d.get("arguments"))
                .map(Value::to_string)
                .unwrap_or_default();
            vec![format!("[tool] {name}({args})")]
        }
        EventKind::ToolResult => {
            let mut lines = vec![if is_error(data) {
                "[tool error]".to_string()
            } else {
                "[tool result]".to_string()
            }];
            let total = content.lines().count();
            lines.extend(content.lines().take(TOOL_RESULT_LINES).map(|l| format!("  {l}")));
            if total > TOOL_RESULT_LINES {
                lines.push(format!("  ... {} more lines", total - TOOL_RESULT_LINES));
            }
            lines
        }
        EventKind::Usage => {
            let n = |key| data.and_then(|d| d.get(key)).and_then(Value::as_u64).unwrap_or(0);
            vec![format!(
                "[usage] {} in / {} out",
                n("input_tokens"),
                n("output_tokens")
            )]
        }
        EventKind::Command => match CommandPayload::from_data(data) {
            Some(CommandPayload {
                command,
                args: Some(args),
            }) => vec![format!("/{command} {args}")],
            Some(CommandPayload { command, args: None }) => vec![format!("/{command}")],
            None => vec!["/?".to_string()],
        },
        EventKind::Fork => match fork_role(data) {
            Some(ForkRole::Parent) => vec![format!(
                "[forked child {}]",
                short_id(data, "child_uuid")
            )],
            Some(ForkRole::Child) => vec![format!(
                "[forked from {} at #{}]",
                short_id(data, "parent_uuid"),
                data.and_then(|d| d.get("fork_message_id"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0)
            )],
            None => vec!["[fork]".to_string()],
        },
        EventKind::Clear => vec!["[cleared]".to_string()],
        EventKind::Mark => vec![labelled("mark", MarkPayload::from_data(data))],
        EventKind::Rewind => vec![labelled("rewind", MarkPayload::from_data(data))],
        EventKind::Interrupted => {
            if content.is_empty() {
                vec!["[interrupted]".to_string()]
            } else {
                vec![format!("[interrupted] {content}")]
            }
        }
        EventKind::AgentKilled => {
            let target = short_id(data, "target");
            let cascade = data
                .and_then(|d| d.get("cascade"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let count = data.and_then(|d| d.get("count")).and_then(Value::as_u64);
            match (cascade, count) {
                (true, Some(n)) => vec![format!("[killed {target} and descendants, {n} agents]")],
                _ => vec![format!("[killed {target}]")],
            }
        }
    }
}

fn prefixed(prefix: &str, text: &str) -> Vec<String> {
    if text.is_empty() {
        return vec![prefix.trim_end().to_string()];
    }
    text.lines().map(|l| format!("{prefix}{l}")).collect()
}

fn labelled(what: &str, mark: MarkPayload) -> String {
    match mark.label {
        Some(label) => format!("[{what} {label}]"),
        None => format!("[{what}]"),
    }
}

fn str_field<'a>(data: Option<&'a Value>, key: &str) -> Option<&'a str> {
    data?.get(key)?.as_str()
}

fn is_error(data: Option<&Value>) -> bool {
    data.and_then(|d| d.get("is_error"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn short_id(data: Option<&Value>, key: &str) -> String {
    str_field(data, key).map_or_else(|| "?".to_string(), |raw| AgentId::from_raw(raw).short().to_owned())
}
