use std::time::Duration;

use thiserror::Error;

/// Errors produced by provider resolution and chat transport.
#[derive(Debug, Error)]
pub enum LlmError {
    /// A provider was selected but its credential or client could not be set up.
    #[error("LLM misconfiguration: {0}")]
    Misconfiguration(String),

    /// 401/403 from the provider; never retried.
    #[error("provider authentication failed: {0}")]
    ProviderAuth(String),

    /// 429 from the provider after backoff was exhausted.
    #[error("provider rate limit exceeded: {0}")]
    ProviderQuota(String),

    /// 5xx from the provider after retries were exhausted.
    #[error("provider outage: {0}")]
    ProviderOutage(String),

    /// Network-level failure (connect reset, DNS, body read) after retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded its deadline.
    #[error("request timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// No provider with a configured credential could serve the model.
    #[error("no configured provider found for model '{model}'")]
    NoProviderConfigured { model: String },

    /// The provider answered 2xx but the body did not match the chat contract.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether the failure class is permanent (retrying cannot help).
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            LlmError::Misconfiguration(_)
                | LlmError::ProviderAuth(_)
                | LlmError::NoProviderConfigured { .. }
                | LlmError::InvalidResponse(_)
        )
    }
}
