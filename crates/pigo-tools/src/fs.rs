//! File tools: `read`, `write`, `edit`, `ls`.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tokio::fs;

use pigo_core::args::{optional_bool, optional_usize, required_str};
use pigo_core::{
    Ctx, Error, PropertySchema, Tool, ToolDefinition, ToolParameters, ToolResult,
};

use crate::sandbox::Sandbox;

/// Largest file `read` will open.
const MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Lines longer than this are cut with a `...` marker.
const MAX_LINE_CHARS: usize = 500;

/// Directory listing cap.
const MAX_LS_ENTRIES: usize = 1000;

// =============================================================================
// read
// =============================================================================

pub struct ReadTool {
    sandbox: Sandbox,
}

impl ReadTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file with 1-indexed line numbers. Supports offset and limit for large files."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property(
                    "path",
                    PropertySchema::string("Absolute path of the file to read"),
                    true,
                )
                .add_property(
                    "offset",
                    PropertySchema::integer("Line to start from (0-indexed)"),
                    false,
                )
                .add_property(
                    "limit",
                    PropertySchema::integer("Maximum number of lines to return"),
                    false,
                ),
        )
    }

    async fn execute(&self, _ctx: &Ctx, args: Value) -> ToolResult {
        let path = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let offset = match optional_usize(&args, "offset") {
            Ok(o) => o.unwrap_or(0),
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let limit = match optional_usize(&args, "limit") {
            Ok(l) => l,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if limit == Some(0) {
            return ToolResult::error("limit must be positive");
        }

        let resolved = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        match fs::metadata(&resolved).await {
            Ok(meta) => {
                if meta.is_dir() {
                    return ToolResult::error(format!("'{}' is a directory", path));
                }
                if meta.len() > MAX_READ_BYTES {
                    return ToolResult::error(format!(
                        "'{}' is {} bytes, larger than the {} byte limit",
                        path,
                        meta.len(),
                        MAX_READ_BYTES
                    ));
                }
            }
            Err(e) => return ToolResult::error(format!("cannot read '{}': {}", path, e)),
        }

        let content = match fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("cannot read '{}': {}", path, e)),
        };

        let mut out = String::new();
        for (idx, line) in content.lines().enumerate().skip(offset) {
            if let Some(limit) = limit {
                if idx - offset >= limit {
                    break;
                }
            }
            let line = if line.chars().count() > MAX_LINE_CHARS {
                let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
                format!("{}...", cut)
            } else {
                line.to_string()
            };
            out.push_str(&format!("{:>6}\t{}\n", idx + 1, line));
        }

        if out.is_empty() {
            out = format!("(empty: '{}' has no lines in the requested range)\n", path);
        }

        ToolResult::result(out)
    }
}

// =============================================================================
// write
// =============================================================================

pub struct WriteTool {
    sandbox: Sandbox,
}

impl WriteTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories and overwriting any existing file."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property(
                    "path",
                    PropertySchema::string("Absolute path of the file to write"),
                    true,
                )
                .add_property("content", PropertySchema::string("Content to write"), true),
        )
    }

    async fn execute(&self, _ctx: &Ctx, args: Value) -> ToolResult {
        let path = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let content = match required_str(&args, "content") {
            Ok(c) => c,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let resolved = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        match write_preserving_mode(&resolved, content).await {
            Ok(()) => ToolResult::silent(format!("Wrote {} bytes to {}", content.len(), path)),
            Err(e) => ToolResult::error(format!("cannot write '{}': {}", path, e)),
        }
    }
}

/// Overwrite `path`, keeping the prior file mode when the file existed.
async fn write_preserving_mode(path: &Path, content: &str) -> Result<(), Error> {
    let existing_perms = fs::metadata(path).await.ok().map(|m| m.permissions());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::internal(format!("create {}: {}", parent.display(), e)))?;
    }

    fs::write(path, content)
        .await
        .map_err(|e| Error::internal(e.to_string()))?;

    if let Some(perms) = existing_perms {
        fs::set_permissions(path, perms)
            .await
            .map_err(|e| Error::internal(format!("restore mode: {}", e)))?;
    }
    Ok(())
}

// =============================================================================
// edit
// =============================================================================

pub struct EditTool {
    sandbox: Sandbox,
}

impl EditTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace old_string with new_string in a file. old_string must match exactly once unless all=true."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property(
                    "path",
                    PropertySchema::string("Absolute path of the file to edit"),
                    true,
                )
                .add_property(
                    "old_string",
                    PropertySchema::string("Exact text to replace"),
                    true,
                )
                .add_property(
                    "new_string",
                    PropertySchema::string("Replacement text"),
                    true,
                )
                .add_property(
                    "all",
                    PropertySchema::boolean("Replace every occurrence (default: false)"),
                    false,
                ),
        )
    }

    async fn execute(&self, _ctx: &Ctx, args: Value) -> ToolResult {
        let path = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let old_string = match required_str(&args, "old_string") {
            Ok(s) => s,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let new_string = match required_str(&args, "new_string") {
            Ok(s) => s,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let all = match optional_bool(&args, "all") {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        if old_string.is_empty() {
            return ToolResult::error("old_string is empty");
        }

        let resolved = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let content = match fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("cannot read '{}': {}", path, e)),
        };

        let count = content.matches(old_string).count();
        if count == 0 {
            return ToolResult::error(format!("old_string not found in {}", path));
        }
        if count > 1 && !all {
            return ToolResult::error(format!(
                "old_string appears {} times in {}; pass all=true to replace every occurrence",
                count, path
            ));
        }

        let updated = if all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };

        match write_preserving_mode(&resolved, &updated).await {
            Ok(()) => {
                let replaced = if all { count } else { 1 };
                ToolResult::silent(format!(
                    "Replaced {} occurrence(s) in {}",
                    replaced, path
                ))
            }
            Err(e) => ToolResult::error(format!("cannot write '{}': {}", path, e)),
        }
    }
}

// =============================================================================
// ls
// =============================================================================

pub struct LsTool {
    sandbox: Sandbox,
}

impl LsTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List a directory. Entries are annotated as [file], [dir], or [link]; dotfiles are hidden unless all=true."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property(
                    "path",
                    PropertySchema::string("Absolute path of the directory to list"),
                    true,
                )
                .add_property(
                    "all",
                    PropertySchema::boolean("Include dotfiles (default: false)"),
                    false,
                ),
        )
    }

    async fn execute(&self, _ctx: &Ctx, args: Value) -> ToolResult {
        let path = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let all = match optional_bool(&args, "all") {
            Ok(a) => a,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let resolved = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let mut reader = match fs::read_dir(&resolved).await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("cannot list '{}': {}", path, e)),
        };

        let mut entries = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if !all && name.starts_with('.') {
                        continue;
                    }
                    // symlink_metadata so links are reported as links, not
                    // their targets.
                    let kind = match entry.path().symlink_metadata() {
                        Ok(meta) if meta.file_type().is_symlink() => "[link]",
                        Ok(meta) if meta.is_dir() => "[dir]",
                        _ => "[file]",
                    };
                    entries.push(format!("{} {}", kind, name));
                }
                Ok(None) => break,
                Err(e) => return ToolResult::error(format!("cannot list '{}': {}", path, e)),
            }
        }

        entries.sort_by(|a, b| {
            let name = |s: &str| s.splitn(2, ' ').nth(1).unwrap_or("").to_string();
            name(a).cmp(&name(b))
        });

        let truncated = entries.len() > MAX_LS_ENTRIES;
        entries.truncate(MAX_LS_ENTRIES);

        let mut out = entries.join("\n");
        if truncated {
            out.push_str(&format!("\n(truncated at {} entries)", MAX_LS_ENTRIES));
        }
        if out.is_empty() {
            out = format!("(empty directory: {})", path);
        }

        ToolResult::result(out)
    }
}
