//! Chat client seam and the HTTP implementation.
//!
//! The extractors only see the [`ChatClient`] trait; the production
//! implementation speaks an OpenAI-compatible chat-completions API with
//! JSON response mode, bounded retries and rate-limit backoff.

use crate::error::{LlmError, Result};
use crate::tier::{ModelTier, TierPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Bounded retry count for rate limits and transient failures.
const MAX_RETRIES: u32 = 3;

/// Base backoff when the provider gives no retry hint.
const BASE_BACKOFF: Duration = Duration::from_millis(1_000);

/// One chat call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// System prompt
    pub system: String,
    /// User prompt
    pub user: String,
    /// Capability tier to run at
    pub tier: ModelTier,
    /// Output token cap
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl ChatRequest {
    /// A deterministic JSON-extraction request at the given tier.
    pub fn extraction(system: impl Into<String>, user: impl Into<String>, tier: ModelTier) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            tier,
            max_tokens: 8_192,
            temperature: 0.0,
        }
    }
}

/// A completed chat call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Raw model output
    pub content: String,
    /// Input token count reported by the provider
    pub input_tokens: u64,
    /// Output token count reported by the provider
    pub output_tokens: u64,
    /// Model identifier that served the call
    pub model: String,
}

/// The seam the extractors depend on.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Run one chat completion.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// The tier policy in force, for cost accounting.
    fn policy(&self) -> &TierPolicy;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// OpenAI-compatible HTTP chat client.
pub struct HttpChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: TierPolicy,
}

impl HttpChatClient {
    /// Create a client against a chat-completions endpoint.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, policy: TierPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(LlmError::Network)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            policy,
        })
    }

    async fn call_once(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let model = self.policy.model(request.tier).to_string();
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user}
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1_000)
                .unwrap_or(BASE_BACKOFF.as_millis() as u64);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: "chat".to_string(),
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        let parsed: ApiResponse = response.json().await?;
        let usage = parsed.usage.unwrap_or_default();
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        Ok(ChatResponse {
            content,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            model: parsed.model.unwrap_or(model),
        })
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut backoff = BASE_BACKOFF;
        let mut last_error = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                warn!(attempt, tier = request.tier.as_str(), "retrying model call");
            }
            match self.call_once(request).await {
                Ok(response) => {
                    info!(
                        tier = request.tier.as_str(),
                        model = %response.model,
                        input_tokens = response.input_tokens,
                        output_tokens = response.output_tokens,
                        "model call complete"
                    );
                    return Ok(response);
                }
                Err(LlmError::RateLimited { retry_after_ms }) => {
                    last_error = format!("rate limited ({}ms hint)", retry_after_ms);
                    sleep(Duration::from_millis(retry_after_ms.max(backoff.as_millis() as u64)))
                        .await;
                    backoff *= 2;
                }
                Err(LlmError::Network(e)) => {
                    last_error = e.to_string();
                    sleep(backoff).await;
                    backoff *= 2;
                }
                // API and parse errors are not retried here; the caller
                // decides whether to escalate a tier.
                Err(e) => return Err(e),
            }
        }

        Err(LlmError::Exhausted(last_error))
    }

    fn policy(&self) -> &TierPolicy {
        &self.policy
    }
}

impl std::fmt::Debug for HttpChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
