//! BYO-key completion client used by the follow-up pipeline.
//!
//! Pure HTTP client over the OpenAI chat-completions and Anthropic messages
//! endpoints. Callers depend on [`ChatCompletion`] so the classifier and the
//! answer generator can run against fakes.

mod anthropic;
mod client;
mod error;
mod json;
mod openai;
mod types;

pub use client::{ChatCompletion, LlmClient, Provider};
pub use error::{LlmError, Result};
pub use json::extract_json_object;
pub use types::{ChatMessage, CompletionOptions, Role};
