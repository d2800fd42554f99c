//! Memory tools: `memory_recall`, `memory_remember`, `memory_forget`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use pigo_core::args::{optional_str, optional_usize, required_str};
use pigo_core::{Ctx, PropertySchema, Tool, ToolDefinition, ToolParameters, ToolResult};
use pigo_memory::{Candidate, Category, MemoryPipeline};

const CATEGORY_VALUES: &[&str] = &[
    "profile",
    "preferences",
    "entities",
    "events",
    "cases",
    "patterns",
];

fn category_enum(description: &str) -> PropertySchema {
    PropertySchema::enum_string(
        description,
        CATEGORY_VALUES.iter().map(|s| s.to_string()).collect(),
    )
}

// =============================================================================
// memory_recall
// =============================================================================

pub struct MemoryRecallTool {
    pipeline: Arc<MemoryPipeline>,
}

impl MemoryRecallTool {
    pub fn new(pipeline: Arc<MemoryPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Tool for MemoryRecallTool {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Search long-term memory. Uses semantic search with keyword fallback; \
         optionally filter by category."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("query", PropertySchema::string("What to look for"), true)
                .add_property(
                    "top_k",
                    PropertySchema::integer("Maximum results (default 5)"),
                    false,
                )
                .add_property("category", category_enum("Restrict to one category"), false),
        )
    }

    async fn execute(&self, ctx: &Ctx, args: Value) -> ToolResult {
        let query = match required_str(&args, "query") {
            Ok(q) => q,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let top_k = match optional_usize(&args, "top_k") {
            Ok(t) => t,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if top_k == Some(0) {
            return ToolResult::error("top_k must be positive");
        }
        let category = match optional_str(&args, "category") {
            Some(raw) => match Category::parse(raw) {
                Some(c) => Some(c),
                None => return ToolResult::error(format!("unknown category '{}'", raw)),
            },
            None => None,
        };

        let memories = match self.pipeline.recall(ctx, query, top_k, category).await {
            Ok(memories) => memories,
            Err(e) => return ToolResult::error(format!("recall failed: {}", e)),
        };

        if memories.is_empty() {
            return ToolResult::result("no memories found");
        }

        let mut out = String::new();
        for memory in &memories {
            out.push_str(&format!(
                "[{}] {} (id: {})\n  {}\n",
                memory.category, memory.abstract_, memory.id, memory.overview
            ));
        }
        ToolResult::result(out)
    }
}

// =============================================================================
// memory_remember
// =============================================================================

pub struct MemoryRememberTool {
    pipeline: Arc<MemoryPipeline>,
}

impl MemoryRememberTool {
    pub fn new(pipeline: Arc<MemoryPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Tool for MemoryRememberTool {
    fn name(&self) -> &str {
        "memory_remember"
    }

    fn description(&self) -> &str {
        "Save something to long-term memory. Duplicates are detected and \
         merged or skipped automatically."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("category", category_enum("Kind of memory"), true)
                .add_property(
                    "abstract",
                    PropertySchema::string("One-sentence summary"),
                    true,
                )
                .add_property(
                    "overview",
                    PropertySchema::string("2-4 sentence overview"),
                    false,
                )
                .add_property("content", PropertySchema::string("Full detail"), false),
        )
    }

    async fn execute(&self, ctx: &Ctx, args: Value) -> ToolResult {
        let candidate = Candidate {
            category: match required_str(&args, "category") {
                Ok(c) => c.to_string(),
                Err(e) => return ToolResult::error(e.to_string()),
            },
            abstract_: match required_str(&args, "abstract") {
                Ok(a) => a.to_string(),
                Err(e) => return ToolResult::error(e.to_string()),
            },
            overview: optional_str(&args, "overview").unwrap_or_default().to_string(),
            content: optional_str(&args, "content").unwrap_or_default().to_string(),
        };

        if Category::parse(&candidate.category).is_none() {
            return ToolResult::error(format!("unknown category '{}'", candidate.category));
        }

        match self.pipeline.remember(ctx, candidate).await {
            Ok(outcome) => ToolResult::silent(outcome.to_string()),
            Err(e) => ToolResult::error(format!("remember failed: {}", e)),
        }
    }
}

// =============================================================================
// memory_forget
// =============================================================================

pub struct MemoryForgetTool {
    pipeline: Arc<MemoryPipeline>,
}

impl MemoryForgetTool {
    pub fn new(pipeline: Arc<MemoryPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl Tool for MemoryForgetTool {
    fn name(&self) -> &str {
        "memory_forget"
    }

    fn description(&self) -> &str {
        "Delete a memory by id."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new().add_property(
                "id",
                PropertySchema::string("Id of the memory to delete"),
                true,
            ),
        )
    }

    async fn execute(&self, _ctx: &Ctx, args: Value) -> ToolResult {
        let id = match required_str(&args, "id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let store = self.pipeline.store();
        match store.delete(id) {
            Ok(removed) => {
                if let Err(e) = store.save() {
                    return ToolResult::error(format!("deleted but save failed: {}", e));
                }
                ToolResult::result(format!("forgot: {}", removed.abstract_))
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

/// All memory tools over one shared pipeline.
pub fn create_memory_tools(pipeline: Arc<MemoryPipeline>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(MemoryRecallTool::new(pipeline.clone())),
        Arc::new(MemoryRememberTool::new(pipeline.clone())),
        Arc::new(MemoryForgetTool::new(pipeline)),
    ]
}
