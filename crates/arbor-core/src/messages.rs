use serde::{Deserialize, Serialize};

use crate::events::EventKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn event_kind(&self) -> EventKind {
        match self {
            Self::System => EventKind::System,
            Self::User => EventKind::User,
            Self::Assistant => EventKind::Assistant,
        }
    }
}

/// One turn of an agent's conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("event kind {0} is not a conversation turn")]
    NotConversation(EventKind),
    #[error("{0} event has no content")]
    MissingContent(EventKind),
}

// --- Convenience constructors ---

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn system_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }

    /// Build a turn from a stored event's kind and content.
    pub fn from_event(kind: EventKind, content: Option<&str>) -> Result<Self, MessageError> {
        let role = match kind {
            EventKind::System => Role::System,
            EventKind::User => Role::User,
            EventKind::Assistant => Role::Assistant,
            other => return Err(MessageError::NotConversation(other)),
        };
        let text = content.ok_or(MessageError::MissingContent(kind))?;
        Ok(Self {
            role,
            text: text.to_owned(),
        })
    }
}
