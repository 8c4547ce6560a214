use crate::chart::DEFAULT_PALETTE;
use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-haiku-4-5-20251001";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3:latest";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatbotConfig {
    /// Prior turns forwarded to the model.
    pub history_window: usize,
    /// Row cap applied to every ledger fetch.
    pub max_results: usize,
    pub palette: Vec<String>,
    pub enable_quick_templates: bool,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            history_window: 6,
            max_results: 1000,
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            enable_quick_templates: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub claude_api_key: Option<String>,
    pub claude_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            claude_api_key: None,
            claude_model: DEFAULT_CLAUDE_MODEL.to_string(),
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            max_tokens: 2000,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Defaults overridden by whichever environment variables are set and non-empty.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let timeout_secs = match get("LLM_TIMEOUT_SECS") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                log::warn!("Ignoring invalid LLM_TIMEOUT_SECS '{}'", raw);
                defaults.timeout_secs
            }),
            None => defaults.timeout_secs,
        };

        Self {
            claude_api_key: get("CLAUDE_API_KEY"),
            claude_model: get("CLAUDE_MODEL").unwrap_or(defaults.claude_model),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            ollama_base_url: get("OLLAMA_BASE_URL").unwrap_or(defaults.ollama_base_url),
            ollama_model: get("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            max_tokens: defaults.max_tokens,
            timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_chatbot_config_defaults_from_partial_json() {
        let config: ChatbotConfig = serde_json::from_str(r#"{"history_window": 2}"#).unwrap();
        assert_eq!(config.history_window, 2);
        assert_eq!(config.max_results, 1000);
        assert_eq!(config.palette.len(), 5);
        assert!(config.enable_quick_templates);
    }

    #[test]
    fn test_llm_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CLAUDE_API_KEY", "sk-test"),
            ("OPENAI_API_KEY", "  "),
            ("OLLAMA_MODEL", "mistral"),
            ("LLM_TIMEOUT_SECS", "15"),
        ]
        .into_iter()
        .collect();
        let config = LlmConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.claude_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai_api_key, None);
        assert_eq!(config.claude_model, DEFAULT_CLAUDE_MODEL);
        assert_eq!(config.ollama_model, "mistral");
        assert_eq!(config.timeout_secs, 15);
    }

    #[test]
    fn test_invalid_timeout_keeps_default() {
        let config = LlmConfig::from_lookup(|key| (key == "LLM_TIMEOUT_SECS").then(|| "soon".to_string()));
        assert_eq!(config.timeout_secs, 60);
    }
}
