//! OpenAI-compatible chat transport
//!
//! One `reqwest::Client` per process component, reused across invocations.
//! Retry policy: 429 backs off 1s/2s/4s, 5xx and network failures retry up
//! to 3 attempts with 2^attempt delays, other 4xx never retry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::provider::{resolve_provider, ResolvedProvider};
use crate::LlmError;

/// Referer header sent to openrouter, which requires one per request.
const OPENROUTER_REFERER: &str = "https://voxflow.dev";
/// Title header sent to openrouter.
const OPENROUTER_TITLE: &str = "Voxflow Pipeline";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const QUOTA_BACKOFF_SECS: [u64; 3] = [1, 2, 4];

/// One chat completion request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Explicit provider tag from the stage definition, if any.
    pub provider_hint: Option<String>,
    pub system_message: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Result of a chat completion: the content plus usage accounting.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub model: String,
    pub provider: String,
}

/// Chat backend seam; the engine holds a trait object so tests can drive
/// the runner without network access.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Perform one chat completion.
    ///
    /// # Errors
    ///
    /// Returns `LlmError` for resolution, transport, and contract failures.
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutcome, LlmError>;
}

/// HTTP implementation over the provider router.
#[derive(Clone)]
pub struct HttpChatClient {
    client: reqwest::Client,
}

impl HttpChatClient {
    /// Build the shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the TLS client cannot be built.
    pub fn new() -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn execute(
        &self,
        provider: &ResolvedProvider,
        body: &ChatBody,
        timeout: Duration,
    ) -> Result<ChatResponse, LlmError> {
        let url = provider.chat_url();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let mut builder = self
                .client
                .post(&url)
                .bearer_auth(&provider.api_key)
                .timeout(timeout)
                .json(body);
            if provider.needs_referer_headers() {
                builder = builder
                    .header("HTTP-Referer", OPENROUTER_REFERER)
                    .header("X-Title", OPENROUTER_TITLE);
            }

            debug!(
                provider = provider.name,
                model = %body.model,
                attempt,
                timeout_secs = timeout.as_secs(),
                "sending chat completion request"
            );
            let started = Instant::now();

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if let Some(delay) = QUOTA_BACKOFF_SECS.get(attempt as usize - 1) {
                            warn!(provider = provider.name, attempt, delay, "rate limited, backing off");
                            tokio::time::sleep(Duration::from_secs(*delay)).await;
                            continue;
                        }
                        return Err(LlmError::ProviderQuota(format!(
                            "{} rate limit persisted after {} attempts",
                            provider.name, attempt
                        )));
                    }
                    if status.is_server_error() {
                        if attempt < MAX_ATTEMPTS {
                            let delay = 1u64 << attempt;
                            warn!(
                                provider = provider.name,
                                status = status.as_u16(),
                                attempt,
                                delay,
                                "server error, retrying"
                            );
                            tokio::time::sleep(Duration::from_secs(delay)).await;
                            continue;
                        }
                        return Err(LlmError::ProviderOutage(format!(
                            "{} returned {} after {} attempts",
                            provider.name, status, attempt
                        )));
                    }
                    if status.is_client_error() {
                        let text = response.text().await.unwrap_or_default();
                        return Err(map_client_error(status, provider.name, &text));
                    }

                    let parsed: ChatResponse = response.json().await.map_err(|e| {
                        LlmError::InvalidResponse(format!(
                            "{} chat response did not parse: {e}",
                            provider.name
                        ))
                    })?;
                    debug!(
                        provider = provider.name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "chat completion succeeded"
                    );
                    return Ok(parsed);
                }
                Err(e) if e.is_timeout() => {
                    if attempt < MAX_ATTEMPTS {
                        let delay = 1u64 << attempt;
                        warn!(provider = provider.name, attempt, delay, "request timed out, retrying");
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                        continue;
                    }
                    return Err(LlmError::Timeout { duration: timeout });
                }
                Err(e) => {
                    if attempt < MAX_ATTEMPTS {
                        let delay = 1u64 << attempt;
                        warn!(provider = provider.name, attempt, delay, error = %e, "network error, retrying");
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                        continue;
                    }
                    return Err(LlmError::Transport(format!(
                        "{} request failed after {} attempts: {e}",
                        provider.name, attempt
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl ChatBackend for HttpChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatOutcome, LlmError> {
        let provider = resolve_provider(&request.model, request.provider_hint.as_deref())?;

        let body = ChatBody {
            model: request.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system_message,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let response = self.execute(&provider, &body, request.timeout).await?;
        outcome_from_response(response, &request.model, provider.name)
    }
}

fn map_client_error(status: StatusCode, provider: &str, body: &str) -> LlmError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", truncate(body, 500))
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::ProviderAuth(format!("{provider} authentication failed: {detail}"))
        }
        _ => LlmError::Transport(format!("{provider} returned client error: {detail}")),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn outcome_from_response(
    response: ChatResponse,
    model: &str,
    provider: &'static str,
) -> Result<ChatOutcome, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse(format!("{provider} response missing choices[0]")))?;

    // A zero-token completion legitimately has no content.
    let content = choice.message.content.unwrap_or_default();
    let usage = response.usage.unwrap_or_default();

    Ok(ChatOutcome {
        content,
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        model: model.to_string(),
        provider: provider.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
}
