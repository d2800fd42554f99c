//! pigo-memory: persistent long-term memory for the pigo agent runtime
//!
//! A six-category memory log with vector and keyword retrieval, plus the
//! extraction/dedup/merge pipeline that feeds it from compacted
//! conversations and from the explicit memory tools.

pub mod pipeline;
pub mod store;

pub use pipeline::{Candidate, MemoryConfig, MemoryPipeline, Outcome};
pub use store::{cosine_similarity, Category, Memory, MemoryStore};
