//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{ChatClient, ChatResponse};
use crate::context::Ctx;
use crate::error::Error;
use crate::message::Message;
use crate::tool::ToolDefinition;

/// A captured `chat` request, for assertions.
#[derive(Debug, Clone)]
pub struct CapturedChat {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

/// A mock chat client that returns pre-queued responses in FIFO order.
///
/// `chat` pops queued responses; when the queue is empty it returns an
/// error, which keeps forgotten expectations loud in tests. `embed` returns
/// a fixed vector unless embeddings are disabled.
pub struct MockClient {
    responses: Mutex<Vec<Result<ChatResponse, Error>>>,
    embeddings: Mutex<Vec<Result<Vec<f32>, Error>>>,
    pub captured: Mutex<Vec<CapturedChat>>,
    pub embed_calls: Mutex<Vec<String>>,
    default_embedding: Option<Vec<f32>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            embeddings: Mutex::new(Vec::new()),
            captured: Mutex::new(Vec::new()),
            embed_calls: Mutex::new(Vec::new()),
            default_embedding: Some(vec![1.0, 0.0, 0.0]),
        }
    }

    /// Disable the default embedding so un-queued `embed` calls fail.
    pub fn without_embeddings(mut self) -> Self {
        self.default_embedding = None;
        self
    }

    pub fn queue_text(&self, content: &str) {
        self.queue(Ok(ChatResponse::text(content)));
    }

    pub fn queue(&self, response: Result<ChatResponse, Error>) {
        self.responses.lock().unwrap().insert(0, response);
    }

    pub fn queue_embedding(&self, embedding: Result<Vec<f32>, Error>) {
        self.embeddings.lock().unwrap().insert(0, embedding);
    }

    pub fn request_count(&self) -> usize {
        self.captured.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CapturedChat> {
        self.captured.lock().unwrap().last().cloned()
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for MockClient {
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn chat(
        &self,
        ctx: &Ctx,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, Error> {
        ctx.check()?;
        self.captured.lock().unwrap().push(CapturedChat {
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });
        match self.responses.lock().unwrap().pop() {
            Some(response) => response,
            None => Err(Error::internal("no mock response queued")),
        }
    }

    async fn embed(&self, ctx: &Ctx, text: &str) -> Result<Vec<f32>, Error> {
        ctx.check()?;
        self.embed_calls.lock().unwrap().push(text.to_string());
        if let Some(queued) = self.embeddings.lock().unwrap().pop() {
            return queued;
        }
        match &self.default_embedding {
            Some(v) => Ok(v.clone()),
            None => Err(Error::network("embeddings unavailable")),
        }
    }
}
