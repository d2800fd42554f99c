//! The bounded agent loop: LLM turn, parallel tool fan-out, repeat.
//!
//! One `process` call handles one user input. Turns are strictly
//! sequential; tool calls within a turn run concurrently and share the
//! turn's ctx. The message list is owned by the loop and mutated only
//! here (and by compaction, which runs between turns).

use std::sync::Arc;

use futures::future::join_all;

use pigo_core::{
    AgentEvent, ChatClient, ChatResponse, Ctx, Error, EventEmitter, Message, ToolRegistry,
    ToolResult, Usage,
};
use pigo_memory::MemoryPipeline;

use crate::compact::{self, CompactionConfig};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Hard stop on (LLM turn, tool fan-out) iterations per input.
    pub max_iterations: usize,
    /// Compaction retries after a context-overflow error from the client.
    pub max_overflow_retries: usize,
    pub compaction: CompactionConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_iterations: 10,
            max_overflow_retries: 2,
            compaction: CompactionConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

pub fn default_system_prompt() -> String {
    "You are pigo, an AI coding assistant with access to tools for reading, \
     writing, and searching files, running shell commands, and long-term memory. \
     Tool calls issued in the same turn run concurrently; their filesystem side \
     effects may interleave in any order, so sequence dependent operations across \
     turns. File paths must be absolute. Prefer small, verifiable steps."
        .to_string()
}

pub struct Agent {
    client: Arc<dyn ChatClient>,
    registry: Arc<ToolRegistry>,
    memory: Option<Arc<MemoryPipeline>>,
    emitter: EventEmitter,
    config: AgentConfig,
    messages: Vec<Message>,
    usage: Usage,
}

impl Agent {
    pub fn new(
        client: Arc<dyn ChatClient>,
        registry: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        let messages = vec![Message::system(config.system_prompt.clone())];
        Self {
            client,
            registry,
            memory: None,
            emitter: EventEmitter::new(),
            config,
            messages,
            usage: Usage::default(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<MemoryPipeline>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// The emitter is clonable; subscribe before calling `process`.
    pub fn events(&self) -> EventEmitter {
        self.emitter.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Truncate history to the system prompt.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
    }

    /// Replace the post-system history (session load).
    pub fn restore_history(&mut self, messages: Vec<Message>) {
        self.messages.truncate(1);
        self.messages.extend(messages);
    }

    /// Drive one user input to completion. Never panics; every failure is
    /// an `Err` here plus an `agent_end` event carrying the error text.
    pub async fn process(&mut self, ctx: &Ctx, input: &str) -> Result<String, Error> {
        self.emitter.emit(&AgentEvent::AgentStart);
        let result = self.run(ctx, input).await;
        self.emitter.emit(&AgentEvent::AgentEnd {
            error: result.as_ref().err().map(|e| e.to_string()),
        });
        result
    }

    async fn run(&mut self, ctx: &Ctx, input: &str) -> Result<String, Error> {
        self.messages.push(Message::user(input));

        for iteration in 0..self.config.max_iterations {
            self.emitter.emit(&AgentEvent::TurnStart);
            tracing::debug!(
                iteration,
                messages = self.messages.len(),
                "Agent turn starting"
            );

            if compact::needs_compaction(&self.messages, &self.config.compaction) {
                self.compact(ctx).await;
            }

            let response = match self.chat_with_overflow_retry(ctx).await {
                Ok(response) => response,
                Err(e) => {
                    self.emitter.emit(&AgentEvent::TurnEnd);
                    return Err(e);
                }
            };
            self.usage.add(response.usage);

            if response.tool_calls.is_empty() {
                self.messages.push(Message::assistant(response.content.clone()));
                self.emitter.emit(&AgentEvent::MessageEnd {
                    content: response.content.clone(),
                });
                self.emitter.emit(&AgentEvent::TurnEnd);
                return Ok(response.content);
            }

            let tool_calls = response.tool_calls.clone();
            self.messages.push(Message::assistant_with_tool_calls(
                response.content,
                tool_calls.clone(),
            ));

            for tc in &tool_calls {
                self.emitter.emit(&AgentEvent::ToolStart {
                    tool_name: tc.name.clone(),
                });
            }

            // Parallel fan-out under the shared ctx. On cancellation the
            // in-flight executions are dropped (killing any subprocesses),
            // partial results are discarded, and every emitted call gets a
            // synthetic "cancelled" result so the pairing invariant holds
            // before the next LLM call.
            let registry = self.registry.clone();
            let fan_out = join_all(
                tool_calls
                    .iter()
                    .map(|tc| registry.execute(ctx, &tc.name, &tc.arguments)),
            );
            let results: Vec<ToolResult> = tokio::select! {
                results = fan_out => results,
                _ = ctx.done() => tool_calls
                    .iter()
                    .map(|_| ToolResult::error("cancelled"))
                    .collect(),
            };

            // Stitch results back in call order regardless of completion
            // order.
            for (tc, result) in tool_calls.iter().zip(results.iter()) {
                self.messages
                    .push(Message::tool_result(&tc.id, result.for_llm.clone()));
                let content = if result.silent {
                    String::new()
                } else {
                    result.for_user.clone()
                };
                self.emitter.emit(&AgentEvent::ToolEnd {
                    tool_name: tc.name.clone(),
                    content,
                });
            }

            self.emitter.emit(&AgentEvent::TurnEnd);

            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        Err(Error::internal(
            "agent loop reached maximum iterations without completing",
        ))
    }

    /// One chat call, retrying through compaction when the provider reports
    /// a context overflow.
    async fn chat_with_overflow_retry(&mut self, ctx: &Ctx) -> Result<ChatResponse, Error> {
        let definitions = self.registry.definitions();
        let mut overflow_retries = 0;

        loop {
            match self.client.chat(ctx, &self.messages, &definitions).await {
                Err(e)
                    if e.is_context_overflow()
                        && overflow_retries < self.config.max_overflow_retries =>
                {
                    overflow_retries += 1;
                    tracing::warn!(
                        attempt = overflow_retries,
                        "Context overflow reported, compacting and retrying"
                    );
                    self.compact(ctx).await;
                }
                other => return other,
            }
        }
    }

    /// Plan, feed the memory pipeline, then summarize and splice. Runs
    /// strictly between turns; never fails the caller.
    async fn compact(&mut self, ctx: &Ctx) {
        let Some(plan) = compact::plan(&self.messages, &self.config.compaction) else {
            return;
        };

        tracing::info!(
            discarding = plan.discarded_count(),
            total = self.messages.len(),
            "Compacting conversation"
        );

        if let Some(memory) = &self.memory {
            memory.extract_from_transcript(ctx, &plan.transcript).await;
        }

        compact::summarize_and_splice(ctx, self.client.as_ref(), &mut self.messages, plan).await;
    }
}
