use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::ids::{AgentId, ToolCallId};
use crate::messages::Message;
use crate::tools::ToolDefinition;

/// Extended-thinking budget requested from the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    None,
    Min,
    Low,
    #[default]
    Med,
    High,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Min => "min",
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThinkingLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "min" => Ok(Self::Min),
            "low" => Ok(Self::Low),
            "med" | "medium" => Ok(Self::Med),
            "high" => Ok(Self::High),
            other => Err(format!("unknown thinking level: {other}")),
        }
    }
}

/// Provider, model and thinking level an agent talks to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub provider: String,
    pub model: String,
    pub thinking: ThinkingLevel,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelSpecError {
    #[error("model spec is empty")]
    Empty,
    #[error("malformed model spec: {0}")]
    Malformed(String),
}

impl ModelSelection {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, thinking: ThinkingLevel) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            thinking,
        }
    }

    /// Apply a `[provider/]model[/thinking]` spec on top of `self`.
    ///
    /// A trailing segment naming a thinking level is stripped and sets the
    /// level. Without an explicit provider the provider is inferred from the
    /// model name, keeping the current one when inference fails.
    pub fn apply_spec(&self, spec: &str) -> Result<ModelSelection, ModelSpecError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ModelSpecError::Empty);
        }

        let mut parts: Vec<&str> = spec.split('/').map(str::trim).collect();
        let mut thinking = self.thinking;
        if parts.len() > 1 {
            if let Some(level) = parts.last().and_then(|s| s.parse::<ThinkingLevel>().ok()) {
                thinking = level;
                let _ = parts.pop();
            }
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ModelSpecError::Malformed(spec.to_string()));
        }

        match parts.as_slice() {
            [model] => Ok(ModelSelection {
                provider: infer_provider(model)
                    .map(str::to_owned)
                    .unwrap_or_else(|| self.provider.clone()),
                model: (*model).to_string(),
                thinking,
            }),
            [provider, model] => Ok(ModelSelection {
                provider: (*provider).to_string(),
                model: (*model).to_string(),
                thinking,
            }),
            _ => Err(ModelSpecError::Malformed(spec.to_string())),
        }
    }
}

/// Guess the provider from a model name.
pub fn infer_provider(model: &str) -> Option<&'static str> {
    if model.starts_with("claude") {
        Some("anthropic")
    } else if model.starts_with("gpt")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
    {
        Some("openai")
    } else if model.starts_with("gemini") {
        Some("google")
    } else {
        None
    }
}

/// Everything a provider needs to run one LLM call for an agent.
#[derive(Clone, Debug)]
pub struct LlmRequest {
    pub selection: ModelSelection,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A finished LLM call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<TokenUsage>,
}

/// The provider/HTTP collaborator as seen by the engine.
///
/// Streaming, retries and wire formats live behind this trait.
pub trait ProviderGateway: Send + Sync {
    /// Drop any cached provider handle for the agent; the next call
    /// resolves a fresh one from the agent's current selection.
    fn invalidate(&self, agent: &AgentId);

    /// Kick off an LLM call. Returns once the call is in flight.
    fn start_call(&self, agent: &AgentId, request: LlmRequest) -> Result<(), ProviderError>;

    /// Non-blocking check for a finished call. Polled by the main loop on
    /// every tick.
    fn poll_reply(&self, _agent: &AgentId) -> Option<Result<LlmReply, ProviderError>> {
        None
    }
}

/// Gateway used when no provider is wired in: invalidations are no-ops and
/// every call is refused.
#[derive(Clone, Debug, Default)]
pub struct OfflineGateway;

impl ProviderGateway for OfflineGateway {
    fn invalidate(&self, _agent: &AgentId) {}

    fn start_call(&self, _agent: &AgentId, request: LlmRequest) -> Result<(), ProviderError> {
        Err(ProviderError::Unavailable(format!(
            "no client configured for provider {}",
            request.selection.provider
        )))
    }
}
