//! pigo-agent: the bounded tool-augmented agent loop and context
//! compaction for the pigo runtime.

pub mod agent;
pub mod compact;

pub use agent::{default_system_prompt, Agent, AgentConfig};
pub use compact::{needs_compaction, CompactionConfig, CompactionPlan};
