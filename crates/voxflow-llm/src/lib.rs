//! LLM provider routing and chat transport
//!
//! Every LLM stage goes through this crate: the router resolves a model
//! identifier (plus an optional explicit provider tag) to a concrete
//! OpenAI-chat-compatible endpoint and credential, the chat client performs
//! the HTTP call with retry, and the pricing table turns reported token
//! usage into a cost estimate.

mod chat;
mod error;
mod pricing;
mod provider;

pub use chat::{ChatBackend, ChatOutcome, ChatRequest, HttpChatClient};
pub use error::LlmError;
pub use pricing::estimate_cost;
pub use provider::{configured_providers, resolve_provider, ResolvedProvider};
