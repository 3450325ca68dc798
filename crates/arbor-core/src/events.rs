use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentId, EventId};
use crate::provider::ThinkingLevel;

/// Event kinds stored in the event log. The vocabulary is fixed.
#[derive(Clone, Copy, Debug, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    System,
    User,
    Assistant,
    ToolCall,
    ToolResult,
    Usage,
    Command,
    Fork,
    Clear,
    Mark,
    Rewind,
    Interrupted,
    AgentKilled,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        Self::System,
        Self::User,
        Self::Assistant,
        Self::ToolCall,
        Self::ToolResult,
        Self::Usage,
        Self::Command,
        Self::Fork,
        Self::Clear,
        Self::Mark,
        Self::Rewind,
        Self::Interrupted,
        Self::AgentKilled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Usage => "usage",
            Self::Command => "command",
            Self::Fork => "fork",
            Self::Clear => "clear",
            Self::Mark => "mark",
            Self::Rewind => "rewind",
            Self::Interrupted => "interrupted",
            Self::AgentKilled => "agent_killed",
        }
    }

    /// Kinds that become turns of the conversation sent to the provider.
    pub fn is_conversation(&self) -> bool {
        matches!(self, Self::System | Self::User | Self::Assistant)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {s}"))
    }
}

/// Names of commands whose effect is re-applied during replay.
pub mod command {
    pub const MODEL: &str = "model";
    pub const PIN: &str = "pin";
    pub const UNPIN: &str = "unpin";
    pub const TOOLSET: &str = "toolset";
}

/// Payload of a `command` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: String,
    pub args: Option<String>,
}

impl CommandPayload {
    pub fn new(command: impl Into<String>, args: Option<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Read a command payload leniently: a missing name yields `None`, and
    /// `args` that are null or not a string come back as `None`.
    pub fn from_data(data: Option<&Value>) -> Option<Self> {
        let data = data?;
        let command = data.get("command").and_then(Value::as_str)?;
        let args = data.get("args").and_then(Value::as_str).map(str::to_owned);
        Some(Self {
            command: command.to_owned(),
            args,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkRole {
    Parent,
    Child,
}

/// Payload of a `fork` event. One of each role is written per fork, both
/// carrying the same `fork_message_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ForkPayload {
    Parent {
        child_uuid: AgentId,
        fork_message_id: EventId,
    },
    Child {
        parent_uuid: AgentId,
        fork_message_id: EventId,
        pinned_paths: Vec<String>,
        toolset_filter: Vec<String>,
        provider: String,
        model: String,
        thinking: ThinkingLevel,
    },
}

/// Role of a stored fork event, read without requiring the full payload.
pub fn fork_role(data: Option<&Value>) -> Option<ForkRole> {
    match data?.get("role").and_then(Value::as_str)? {
        "parent" => Some(ForkRole::Parent),
        "child" => Some(ForkRole::Child),
        _ => None,
    }
}

/// String array stored under `key`. Non-array values yield `None`;
/// non-string elements are skipped.
pub fn string_list(data: Option<&Value>, key: &str) -> Option<Vec<String>> {
    let items = data?.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
    )
}

/// Payload of an `agent_killed` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KillPayload {
    pub killed_by: String,
    pub target: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl KillPayload {
    pub fn by_user(target: AgentId) -> Self {
        Self {
            killed_by: "user".into(),
            target,
            cascade: None,
            count: None,
        }
    }

    pub fn cascade_by_user(target: AgentId, count: usize) -> Self {
        Self {
            cascade: Some(true),
            count: Some(count),
            ..Self::by_user(target)
        }
    }
}

/// Payload of `mark` and `rewind` events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub label: Option<String>,
}

impl MarkPayload {
    pub fn from_data(data: Option<&Value>) -> Self {
        Self {
            label: data
                .and_then(|d| d.get("label"))
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_strings_roundtrip() {
        for kind in EventKind::ALL {
            let parsed: EventKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
        assert!("bogus".parse::<EventKind>().is_err());
    }

    #[test]
    fn conversation_kinds() {
        assert!(EventKind::User.is_conversation());
        assert!(EventKind::Assistant.is_conversation());
        assert!(EventKind::System.is_conversation());
        assert!(!EventKind::Command.is_conversation());
        assert!(!EventKind::ToolCall.is_conversation());
        assert!(!EventKind::Usage.is_conversation());
        assert!(!EventKind::Fork.is_conversation());
    }

    #[test]
    fn command_payload_lenient_args() {
        let p = CommandPayload::from_data(Some(&json!({"command": "pin", "args": null}))).unwrap();
        assert_eq!(p.command, "pin");
        assert!(p.args.is_none());

        let p = CommandPayload::from_data(Some(&json!({"command": "toolset", "args": 42}))).unwrap();
        assert!(p.args.is_none());

        assert!(CommandPayload::from_data(Some(&json!({"args": "x"}))).is_none());
        assert!(CommandPayload::from_data(None).is_none());
    }

    #[test]
    fn fork_payload_tagged_by_role() {
        let payload = ForkPayload::Parent {
            child_uuid: AgentId::from_raw("child"),
            fork_message_id: 7,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["role"], "parent");
        assert_eq!(json["child_uuid"], "child");
        assert_eq!(fork_role(Some(&json)), Some(ForkRole::Parent));
    }

    #[test]
    fn string_list_ignores_non_arrays() {
        let data = json!({"pinned_paths": "not-an-array", "toolset_filter": ["a", 3, "b"]});
        assert!(string_list(Some(&data), "pinned_paths").is_none());
        assert_eq!(
            string_list(Some(&data), "toolset_filter").unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(string_list(Some(&data), "missing").is_none());
    }

    #[test]
    fn kill_payload_shapes() {
        let single = serde_json::to_value(KillPayload::by_user(AgentId::from_raw("t"))).unwrap();
        assert_eq!(single, json!({"killed_by": "user", "target": "t"}));

        let cascade =
            serde_json::to_value(KillPayload::cascade_by_user(AgentId::from_raw("t"), 3)).unwrap();
        assert_eq!(cascade["cascade"], true);
        assert_eq!(cascade["count"], 3);
    }
}
