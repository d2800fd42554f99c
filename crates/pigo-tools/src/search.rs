//! Search tools: `grep` (content search) and `find` (glob search).
//!
//! Both prefer the fast external tools (`rg`, `fd`/`fdfind`) and fall back
//! to a native walker with fixed skip rules when those are unavailable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;

use pigo_core::args::{optional_str, required_str};
use pigo_core::{
    run_blocking, Ctx, PropertySchema, Tool, ToolDefinition, ToolParameters, ToolResult,
};

use crate::sandbox::Sandbox;

/// Caps shared by both tools.
const MAX_GREP_MATCHES: usize = 100;
const MAX_FIND_RESULTS: usize = 1000;
const MAX_OUTPUT_BYTES: usize = 50 * 1024;
const MAX_GREP_LINE_CHARS: usize = 500;

/// Directories the native walker never descends into (hidden dirs are
/// skipped by name).
const SKIP_DIRS: &[&str] = &["node_modules", "vendor"];

/// Extensions treated as binary and never grepped.
const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "bin", "o", "a", "obj", "class", "jar", "png", "jpg", "jpeg",
    "gif", "bmp", "ico", "webp", "pdf", "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "mp3",
    "mp4", "avi", "mov", "wasm", "pyc", "db", "sqlite", "woff", "woff2", "ttf", "eot",
];

fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || SKIP_DIRS.contains(&name)
}

fn is_binary_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            BINARY_EXTENSIONS.iter().any(|b| *b == ext)
        })
        .unwrap_or(false)
}

/// Recursively collect entries under `root`, honoring the skip rules.
/// Returns (path, is_dir) pairs; `root` itself is not included.
fn walk(root: &Path, cap: usize) -> Vec<(PathBuf, bool)> {
    let mut results = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if results.len() >= cap {
            break;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            if results.len() >= cap {
                break;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if is_skipped_dir(&name) {
                    continue;
                }
                results.push((path.clone(), true));
                stack.push(path);
            } else {
                if name.starts_with('.') {
                    continue;
                }
                results.push((path, false));
            }
        }
    }

    results
}

fn relativize(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

// =============================================================================
// grep
// =============================================================================

pub struct GrepTool {
    sandbox: Sandbox,
}

impl GrepTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    /// Fast path: `rg --json`. Returns None when rg is unavailable, so the
    /// caller falls back to the native walker.
    async fn grep_with_rg(&self, ctx: &Ctx, pattern: &str, root: &Path) -> Option<ToolResult> {
        let mut cmd = Command::new("rg");
        cmd.arg("--json")
            .arg("--regexp")
            .arg(pattern)
            .arg(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().ok()?;
        let output = match ctx.run(child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(_)) => return None,
            Err(e) => return Some(ToolResult::error(e.to_string())),
        };

        // rg: 0 = matches, 1 = no matches, 2 = usage/pattern error.
        match output.status.code() {
            Some(0) => {}
            Some(1) => return Some(ToolResult::result("no matches")),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Some(ToolResult::error(format!(
                    "invalid pattern '{}': {}",
                    pattern,
                    stderr.trim()
                )));
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = Vec::new();
        for json_line in stdout.lines() {
            if lines.len() >= MAX_GREP_MATCHES {
                break;
            }
            let Ok(event) = serde_json::from_str::<Value>(json_line) else {
                continue;
            };
            if event.get("type").and_then(Value::as_str) != Some("match") {
                continue;
            }
            let data = &event["data"];
            let (Some(path), Some(line_number), Some(text)) = (
                data["path"]["text"].as_str(),
                data["line_number"].as_u64(),
                data["lines"]["text"].as_str(),
            ) else {
                continue;
            };
            lines.push(format_match(
                &relativize(Path::new(path), root),
                line_number as usize,
                text,
            ));
        }

        Some(finish_grep(lines))
    }

    fn grep_native(pattern: &str, root: &Path) -> ToolResult {
        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("invalid pattern '{}': {}", pattern, e)),
        };

        let mut lines = Vec::new();
        'outer: for (path, is_dir) in walk(root, usize::MAX) {
            if is_dir || is_binary_path(&path) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    lines.push(format_match(&relativize(&path, root), idx + 1, line));
                    if lines.len() >= MAX_GREP_MATCHES {
                        break 'outer;
                    }
                }
            }
        }

        finish_grep(lines)
    }
}

fn format_match(rel_path: &str, line_number: usize, text: &str) -> String {
    let text = text.trim_end_matches('\n');
    let text = if text.chars().count() > MAX_GREP_LINE_CHARS {
        let cut: String = text.chars().take(MAX_GREP_LINE_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    };
    format!("{}:{}: {}", rel_path, line_number, text)
}

fn finish_grep(lines: Vec<String>) -> ToolResult {
    if lines.is_empty() {
        return ToolResult::result("no matches");
    }
    let mut out = String::new();
    for line in &lines {
        if out.len() + line.len() + 1 > MAX_OUTPUT_BYTES {
            out.push_str("(output truncated)\n");
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    ToolResult::result(out)
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents under a directory for a POSIX-ERE pattern. \
         Returns up to 100 matches as path:line: text."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property(
                    "pattern",
                    PropertySchema::string("Regular expression to search for"),
                    true,
                )
                .add_property(
                    "path",
                    PropertySchema::string("Absolute path of the directory to search"),
                    true,
                ),
        )
    }

    async fn execute(&self, ctx: &Ctx, args: Value) -> ToolResult {
        let pattern = match required_str(&args, "pattern") {
            Ok(p) => p.to_string(),
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let path = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let root = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if !root.is_dir() {
            return ToolResult::error(format!("'{}' is not a directory", path));
        }

        if let Some(result) = self.grep_with_rg(ctx, &pattern, &root).await {
            return result;
        }

        match run_blocking(move || Self::grep_native(&pattern, &root)).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

// =============================================================================
// find
// =============================================================================

pub struct FindTool {
    sandbox: Sandbox,
}

impl FindTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    /// Fast path via `fd` (or Debian's `fdfind`). None when neither exists.
    async fn find_with_fd(
        &self,
        ctx: &Ctx,
        pattern: &str,
        root: &Path,
        type_filter: &str,
    ) -> Option<ToolResult> {
        for binary in ["fd", "fdfind"] {
            let mut cmd = Command::new(binary);
            cmd.arg("--glob")
                .arg(pattern)
                .arg("--max-results")
                .arg(MAX_FIND_RESULTS.to_string());
            match type_filter {
                "file" => {
                    cmd.arg("--type").arg("f");
                }
                "directory" => {
                    cmd.arg("--type").arg("d");
                }
                _ => {}
            }
            cmd.arg(root)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true);

            let Ok(child) = cmd.spawn() else {
                continue;
            };
            let output = match ctx.run(child.wait_with_output()).await {
                Ok(Ok(output)) => output,
                Ok(Err(_)) => continue,
                Err(e) => return Some(ToolResult::error(e.to_string())),
            };
            if !output.status.success() {
                continue;
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let results: Vec<String> = stdout
                .lines()
                .take(MAX_FIND_RESULTS)
                .map(|line| relativize(Path::new(line), root))
                .collect();
            return Some(finish_find(results));
        }
        None
    }

    fn find_native(pattern: &str, root: &Path, type_filter: &str) -> ToolResult {
        let matcher = match glob::Pattern::new(pattern) {
            Ok(m) => m,
            Err(e) => return ToolResult::error(format!("invalid glob '{}': {}", pattern, e)),
        };

        let mut results = Vec::new();
        for (path, is_dir) in walk(root, usize::MAX) {
            if results.len() >= MAX_FIND_RESULTS {
                break;
            }
            let type_ok = match type_filter {
                "file" => !is_dir,
                "directory" => is_dir,
                _ => true,
            };
            if !type_ok {
                continue;
            }
            let rel = relativize(&path, root);
            let name_match = path
                .file_name()
                .map(|n| matcher.matches(&n.to_string_lossy()))
                .unwrap_or(false);
            if matcher.matches(&rel) || name_match {
                results.push(rel);
            }
        }

        finish_find(results)
    }
}

fn finish_find(results: Vec<String>) -> ToolResult {
    if results.is_empty() {
        return ToolResult::result("no matches");
    }
    let mut out = String::new();
    for line in &results {
        if out.len() + line.len() + 1 > MAX_OUTPUT_BYTES {
            out.push_str("(output truncated)\n");
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    ToolResult::result(out)
}

#[async_trait]
impl Tool for FindTool {
    fn name(&self) -> &str {
        "find"
    }

    fn description(&self) -> &str {
        "Find files and directories matching a glob pattern under a directory. \
         Returns up to 1000 relative paths."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property(
                    "pattern",
                    PropertySchema::string("Glob pattern, e.g. '*.rs' or 'src/**/*.ts'"),
                    true,
                )
                .add_property(
                    "path",
                    PropertySchema::string("Absolute path of the directory to search"),
                    true,
                )
                .add_property(
                    "type",
                    PropertySchema::enum_string(
                        "Filter results by kind (default: both)",
                        vec![
                            "file".to_string(),
                            "directory".to_string(),
                            "both".to_string(),
                        ],
                    ),
                    false,
                ),
        )
    }

    async fn execute(&self, ctx: &Ctx, args: Value) -> ToolResult {
        let pattern = match required_str(&args, "pattern") {
            Ok(p) => p.to_string(),
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let path = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let type_filter = optional_str(&args, "type").unwrap_or("both").to_string();

        let root = match self.sandbox.resolve(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if !root.is_dir() {
            return ToolResult::error(format!("'{}' is not a directory", path));
        }

        if let Some(result) = self.find_with_fd(ctx, &pattern, &root, &type_filter).await {
            return result;
        }

        match run_blocking(move || Self::find_native(&pattern, &root, &type_filter)).await {
            Ok(result) => result,
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
