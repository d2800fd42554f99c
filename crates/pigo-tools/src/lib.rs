//! pigo-tools: Built-in tools for the pigo agent runtime
//!
//! The default tool set available to the agent:
//! - Files: read, write, edit, ls
//! - Search: grep, find
//! - Shell: bash (sanitized environment, layered timeout)
//! - Memory: memory_recall, memory_remember, memory_forget
//!
//! Every file-accepting tool validates its path through the sandbox.

pub mod bash;
pub mod fs;
pub mod memory_tools;
pub mod sandbox;
pub mod search;

pub use bash::BashTool;
pub use fs::{EditTool, LsTool, ReadTool, WriteTool};
pub use memory_tools::{
    create_memory_tools, MemoryForgetTool, MemoryRecallTool, MemoryRememberTool,
};
pub use sandbox::{sanitize_env, validate_path, Sandbox};
pub use search::{FindTool, GrepTool};

use std::path::PathBuf;
use std::sync::Arc;

use pigo_core::{Tool, ToolRegistry};
use pigo_memory::MemoryPipeline;

/// Configuration for the default tool set.
#[derive(Clone)]
pub struct ToolsConfig {
    /// Boundary for filesystem operations; empty disables the check.
    pub allowed_dir: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }
}

impl ToolsConfig {
    pub fn new(allowed_dir: impl Into<PathBuf>) -> Self {
        Self {
            allowed_dir: allowed_dir.into(),
        }
    }
}

/// Build a registry with the full default tool set.
pub fn create_default_registry(
    config: &ToolsConfig,
    memory: Option<Arc<MemoryPipeline>>,
) -> ToolRegistry {
    let registry = ToolRegistry::new();
    let sandbox = Sandbox::new(&config.allowed_dir);

    registry.register(Arc::new(ReadTool::new(sandbox.clone())));
    registry.register(Arc::new(WriteTool::new(sandbox.clone())));
    registry.register(Arc::new(EditTool::new(sandbox.clone())));
    registry.register(Arc::new(LsTool::new(sandbox.clone())));
    registry.register(Arc::new(GrepTool::new(sandbox.clone())));
    registry.register(Arc::new(FindTool::new(sandbox)));

    let bash = if config.allowed_dir.as_os_str().is_empty() {
        BashTool::new()
    } else {
        BashTool::new().with_workdir(&config.allowed_dir)
    };
    registry.register(Arc::new(bash));

    if let Some(pipeline) = memory {
        for tool in create_memory_tools(pipeline) {
            registry.register(tool);
        }
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use pigo_core::testing::MockClient;
    use pigo_memory::{MemoryConfig, MemoryStore};
    use tempfile::TempDir;

    #[test]
    fn test_default_registry_tool_names() {
        let dir = TempDir::new().unwrap();
        let pipeline = Arc::new(MemoryPipeline::new(
            Arc::new(MemoryStore::in_memory()),
            Arc::new(MockClient::new()),
            MemoryConfig::default(),
        ));
        let registry =
            create_default_registry(&ToolsConfig::new(dir.path()), Some(pipeline));

        let names = registry.names();
        for expected in [
            "bash",
            "edit",
            "find",
            "grep",
            "ls",
            "memory_forget",
            "memory_recall",
            "memory_remember",
            "read",
            "write",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_registry_without_memory() {
        let dir = TempDir::new().unwrap();
        let registry = create_default_registry(&ToolsConfig::new(dir.path()), None);
        assert_eq!(registry.len(), 7);
    }
}
