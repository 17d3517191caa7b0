//! LLM chat-completion client abstraction.
//!
//! The runtime assembles an `LlmInvocation` fresh for every call — endpoint,
//! credentials and sampling parameters are re-read from the agent state each
//! time, so `set_env` takes effect on the very next HTTP request.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ensemble_core::types::{LlmConfig, TokenUsage};

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// OpenAI-compatible chat-completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub n: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatCompletionRequest {
    /// Build a request from an agent's LLM configuration.
    pub fn from_config(config: &LlmConfig, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: config.model.clone(),
            messages,
            temperature: config.temperature,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            n: 1,
            stream: false,
            max_tokens: config.max_tokens,
        }
    }
}

/// One fully resolved call: endpoint + credentials + body + deadline.
#[derive(Debug, Clone)]
pub struct LlmInvocation {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub request: ChatCompletionRequest,
}

impl LlmInvocation {
    /// Assemble an invocation from config, a resolved key and history.
    pub fn prepare(config: &LlmConfig, api_key: Option<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            request: ChatCompletionRequest::from_config(config, messages),
        }
    }
}

/// First choice content plus extracted stats.
#[derive(Debug, Clone)]
pub struct ChatCompletionOutput {
    pub content: String,
    pub usage: TokenUsage,
    pub model: Option<String>,
}

/// Provider errors.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("provider returned HTTP {status}: {body}")]
    Response { status: u16, body: String },

    #[error("malformed response body: {0}")]
    MalformedBody(String),
}

impl LlmError {
    /// Transient errors worth a bounded retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::RateLimited(_) | LlmError::Timeout(_) => true,
            LlmError::Response { status, .. } => *status >= 500,
            LlmError::Auth(_) | LlmError::MalformedBody(_) => false,
        }
    }
}

/// LLM client trait.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, invocation: LlmInvocation) -> Result<ChatCompletionOutput, LlmError>;
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: String,
}

/// HTTP client for OpenAI-compatible chat-completions endpoints.
pub struct HttpLlmClient {
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new() -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, invocation: LlmInvocation) -> Result<ChatCompletionOutput, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &invocation.api_key {
            let value = format!("Bearer {}", key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).map_err(|e| LlmError::Http(e.to_string()))?,
            );
        }

        tracing::debug!(
            endpoint = %invocation.endpoint,
            model = %invocation.request.model,
            message_count = invocation.request.messages.len(),
            "llm request prepared"
        );

        let response = self
            .client
            .post(&invocation.endpoint)
            .headers(headers)
            .timeout(invocation.timeout)
            .json(&invocation.request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(invocation.timeout.as_secs())
                } else {
                    LlmError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Auth(body));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Response {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        let parsed: WireResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::MalformedBody(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedBody("missing choices".to_string()))?;

        Ok(ChatCompletionOutput {
            content,
            usage: parsed.usage.unwrap_or_default(),
            model: parsed.model,
        })
    }
}

/// Invocation facts captured by the scripted client.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub api_key: Option<String>,
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Scripted client for tests: replies in order, recording every call.
#[derive(Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    recorded: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering, to widen suspension windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, raw: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(raw.into()));
        }
    }

    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error));
        }
    }

    /// Calls observed so far, oldest first.
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.recorded
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.recorded.lock().map(|calls| calls.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, invocation: LlmInvocation) -> Result<ChatCompletionOutput, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Ok(mut calls) = self.recorded.lock() {
            calls.push(RecordedCall {
                api_key: invocation.api_key.clone(),
                model: invocation.request.model.clone(),
                messages: invocation.request.messages.clone(),
            });
        }

        let next = self
            .replies
            .lock()
            .map_err(|_| LlmError::Http("scripted client poisoned".to_string()))?
            .pop_front();
        match next {
            Some(Ok(content)) => Ok(ChatCompletionOutput {
                content,
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
                model: Some(invocation.request.model),
            }),
            Some(Err(error)) => Err(error),
            None => Err(LlmError::Http("scripted client exhausted".to_string())),
        }
    }
}
