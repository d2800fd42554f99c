//! pigo-core: Core types and traits for the pigo agent runtime
//!
//! This crate provides the foundational pieces the rest of the workspace is
//! built on: the message model, the tool contract and registry, the LLM
//! client boundary, the event emitter, and the cancellation context.

pub mod args;
pub mod blocking;
pub mod client;
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod result;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use blocking::run_blocking;
pub use client::{ChatClient, ChatResponse, FinishReason, Usage};
pub use context::Ctx;
pub use error::Error;
pub use event::{AgentEvent, EventEmitter, Subscription};
pub use message::{estimate_chars, Message, Role, ToolCall};
pub use result::ToolResult;
pub use tool::{PropertySchema, Tool, ToolDefinition, ToolParameters, ToolRegistry};

pub type Result<T> = std::result::Result<T, Error>;
