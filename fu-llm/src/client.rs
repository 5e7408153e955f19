use crate::anthropic::{ANTHROPIC_DEFAULT_BASE_URL, AnthropicClient};
use crate::error::{LlmError, Result};
use crate::openai::{OPENAI_DEFAULT_BASE_URL, OpenAiClient};
use crate::types::{ChatMessage, CompletionOptions};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

/// Anything that can turn a message list into a single text completion.
#[async_trait::async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    base_url: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str) -> Self {
        let provider = detect_provider(model);
        Self {
            provider,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            client: build_http_client(DEFAULT_TIMEOUT),
        }
    }

    /// Point the client at an alternate endpoint root (e.g. an OpenAI-compatible gateway).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = Some(base_url).filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = build_http_client(timeout);
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.as_str(),
            (None, Provider::OpenAI) => OPENAI_DEFAULT_BASE_URL,
            (None, Provider::Anthropic) => ANTHROPIC_DEFAULT_BASE_URL,
        }
    }
}

#[async_trait::async_trait]
impl ChatCompletion for LlmClient {
    #[tracing::instrument(level = "info", skip_all, fields(provider = ?self.provider))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::NotConfigured("api key is empty".into()));
        }
        if messages.is_empty() {
            return Err(LlmError::InvalidInput("messages must not be empty".into()));
        }

        let call = async {
            match self.provider {
                Provider::OpenAI => {
                    let c = OpenAiClient::new(
                        self.client.clone(),
                        self.base_url(),
                        &self.api_key,
                        &self.model,
                    );
                    c.complete(messages, options).await
                }
                Provider::Anthropic => {
                    let c = AnthropicClient::new(
                        self.client.clone(),
                        self.base_url(),
                        &self.api_key,
                        &self.model,
                    );
                    c.complete(messages, options).await
                }
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout)),
        }
    }
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(%e, "reqwest client build failed; falling back to default client");
            reqwest::Client::new()
        })
}

fn detect_provider(model: &str) -> Provider {
    let m = model.to_ascii_lowercase();
    if m.starts_with("claude-") {
        return Provider::Anthropic;
    }
    Provider::OpenAI
}
