use super::{
    resolve_identifier, ChatMessage, Completion, CompletionProvider, CompletionRequest, ProviderFactory,
    ProviderTarget,
};
use crate::config::LlmConfig;
use crate::error::{AnalyticsError, Result};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

fn http_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

async fn ensure_success(response: Response, provider: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!("{} API error (status {}): {}", provider, status, body);
    Err(AnalyticsError::upstream(format!(
        "{} API error (status {}): {}",
        provider, status, body
    )))
}

fn history_messages(history: &[ChatMessage]) -> Vec<Value> {
    history
        .iter()
        .map(|msg| json!({"role": msg.role.to_string(), "content": msg.content}))
        .collect()
}

#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key,
            model,
            max_tokens,
        })
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn query(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut messages = history_messages(&request.history);
        messages.push(json!({"role": "user", "content": request.user_content()}));

        let response = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&json!({
                "model": &self.model,
                "max_tokens": self.max_tokens,
                "system": &request.system,
                "messages": messages,
            }))
            .send()
            .await?;
        let response = ensure_success(response, "Anthropic").await?;

        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            content: Vec<ContentBlock>,
        }

        let body: ApiResponse = response.json().await?;
        let content = body
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| AnalyticsError::upstream("Empty response from Anthropic"))?;

        debug!("Anthropic {} returned {} chars", self.model, content.len());
        Ok(Completion {
            content,
            provider_name: self.provider_name().to_string(),
            model_name: self.model.clone(),
        })
    }

    fn provider_name(&self) -> &str {
        "claude"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key,
            model,
            max_tokens,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn query(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut messages = vec![json!({"role": "system", "content": &request.system})];
        messages.extend(history_messages(&request.history));
        messages.push(json!({"role": "user", "content": request.user_content()}));

        let mut payload = json!({
            "model": &self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
        });
        if request.structured {
            payload["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let response = ensure_success(response, "OpenAI").await?;

        let body: Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AnalyticsError::upstream("Empty response from OpenAI"))?
            .to_string();

        debug!("OpenAI {} returned {} chars", self.model, content.len());
        Ok(Completion {
            content,
            provider_name: self.provider_name().to_string(),
            model_name: self.model.clone(),
        })
    }

    fn provider_name(&self) -> &str {
        "chatgpt"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn query(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut messages = vec![json!({"role": "system", "content": &request.system})];
        messages.extend(history_messages(&request.history));
        messages.push(json!({"role": "user", "content": request.user_content()}));

        let mut payload = json!({
            "model": &self.model,
            "messages": messages,
            "stream": false,
        });
        if request.structured {
            payload["format"] = json!("json");
        }

        let url = format!("{}/api/chat", self.base_url);
        let response = self.client.post(&url).json(&payload).send().await?;
        let response = ensure_success(response, "Ollama").await?;

        let body: Value = response.json().await?;
        let content = body["message"]["content"]
            .as_str()
            .ok_or_else(|| AnalyticsError::upstream("Empty response from Ollama"))?
            .to_string();

        Ok(Completion {
            content,
            provider_name: self.provider_name().to_string(),
            model_name: self.model.clone(),
        })
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Builds HTTP providers from an [`LlmConfig`].
#[derive(Debug, Clone, Default)]
pub struct DefaultProviderFactory {
    config: LlmConfig,
}

impl DefaultProviderFactory {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(LlmConfig::from_env())
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, identifier: &str) -> Result<Box<dyn CompletionProvider>> {
        let config = &self.config;
        match resolve_identifier(identifier, config)? {
            ProviderTarget::Claude(model) => {
                let key = config.claude_api_key.clone().ok_or_else(|| {
                    AnalyticsError::validation("Claude API key not configured. Set CLAUDE_API_KEY.")
                })?;
                Ok(Box::new(AnthropicProvider::new(
                    key,
                    model,
                    config.max_tokens,
                    config.timeout_secs,
                )?))
            }
            ProviderTarget::OpenAi(model) => {
                let key = config.openai_api_key.clone().ok_or_else(|| {
                    AnalyticsError::validation("OpenAI API key not configured. Set OPENAI_API_KEY.")
                })?;
                Ok(Box::new(OpenAiProvider::new(
                    key,
                    model,
                    config.max_tokens,
                    config.timeout_secs,
                )?))
            }
            ProviderTarget::Ollama(model) => Ok(Box::new(OllamaProvider::new(
                config.ollama_base_url.clone(),
                model,
                config.timeout_secs,
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_requires_api_key() {
        let factory = DefaultProviderFactory::default();
        let err = factory.create("claude").err().unwrap();
        assert!(err.to_string().contains("CLAUDE_API_KEY"));
    }

    #[test]
    fn test_factory_builds_ollama_without_key() {
        let factory = DefaultProviderFactory::default();
        let provider = factory.create("ollama:mistral").unwrap();
        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model_name(), "mistral");
    }

    #[test]
    fn test_factory_uses_configured_model() {
        let config = LlmConfig {
            openai_api_key: Some("sk".to_string()),
            openai_model: "gpt-4o".to_string(),
            ..Default::default()
        };
        let provider = DefaultProviderFactory::new(config).create("chatgpt").unwrap();
        assert_eq!(provider.model_name(), "gpt-4o");
    }
}
