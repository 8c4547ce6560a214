//! Uniform text-completion capability used by the planning, conversational
//! and SQL-generation calls.

#[cfg(feature = "providers")]
pub mod http;

#[cfg(feature = "providers")]
pub use http::{AnthropicProvider, DefaultProviderFactory, OllamaProvider, OpenAiProvider};

use crate::config::LlmConfig;
use crate::error::{AnalyticsError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const JSON_ONLY_SUFFIX: &str = "\n\nIMPORTANT: Respond with valid JSON only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub history: Vec<ChatMessage>,
    /// Ask for a JSON-only answer.
    pub structured: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            history: Vec::new(),
            structured: false,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn structured(mut self) -> Self {
        self.structured = true;
        self
    }

    /// The final user turn as sent on the wire.
    pub fn user_content(&self) -> String {
        if self.structured {
            format!("{}{}", self.user, JSON_ONLY_SUFFIX)
        } else {
            self.user.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub provider_name: String,
    pub model_name: String,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn query(&self, request: &CompletionRequest) -> Result<Completion>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

/// Turns a provider identifier from the request into a live provider.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, identifier: &str) -> Result<Box<dyn CompletionProvider>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderTarget {
    Claude(String),
    OpenAi(String),
    Ollama(String),
}

/// Maps an identifier (friendly alias, legacy name, `ollama:<model>` or a
/// raw model id) to a provider family and model.
pub fn resolve_identifier(identifier: &str, config: &LlmConfig) -> Result<ProviderTarget> {
    let raw = identifier.trim();
    let normalized = raw.to_ascii_lowercase();

    let target = match normalized.as_str() {
        "" | "claude" | "claude-haiku-4.5" | "claude-sonnet-4.5-mini" => {
            ProviderTarget::Claude(config.claude_model.clone())
        }
        "chatgpt" | "gpt-4o-mini" | "gpt-4o" | "gpt-5-mini" | "gpt-5.1-mini" => {
            ProviderTarget::OpenAi(config.openai_model.clone())
        }
        "ollama" => ProviderTarget::Ollama(config.ollama_model.clone()),
        _ if normalized.starts_with("ollama:") => {
            let model = raw["ollama:".len()..].trim();
            if model.is_empty() {
                return Err(AnalyticsError::validation("ollama: identifier needs a model name"));
            }
            ProviderTarget::Ollama(model.to_string())
        }
        _ if normalized.starts_with("claude") => ProviderTarget::Claude(raw.to_string()),
        _ if normalized.starts_with("gpt") => ProviderTarget::OpenAi(raw.to_string()),
        _ => {
            return Err(AnalyticsError::validation(format!(
                "Unknown LLM provider: {}",
                identifier
            )))
        }
    };

    Ok(target)
}
