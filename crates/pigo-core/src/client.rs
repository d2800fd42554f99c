use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::Ctx;
use crate::error::Error;
use crate::message::{Message, ToolCall};
use crate::tool::ToolDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One model turn: text, any requested tool calls, and accounting.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        }
    }

    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        }
    }
}

/// The LLM boundary the runtime is written against. Implementations handle
/// the wire protocol, retries, and (optionally) streaming internally; the
/// loop only ever sees a finished turn or an `Error`.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Model name this client is configured for, for display.
    fn model(&self) -> &str;

    async fn chat(
        &self,
        ctx: &Ctx,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, Error>;

    /// Dense embedding for memory retrieval. Callers degrade to
    /// keyword-only behavior when this fails.
    async fn embed(&self, ctx: &Ctx, text: &str) -> Result<Vec<f32>, Error>;
}
