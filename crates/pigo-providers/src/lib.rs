//! pigo-providers: LLM client implementations for the pigo agent runtime

pub mod openai;
pub mod retry;

pub use openai::{ApiType, OpenAiClient, DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL, DEFAULT_MODEL};
pub use retry::{Backoff, RetryPolicy};
