//! The `bash` tool: POSIX shell execution with a sanitized environment,
//! layered timeout, and merged tail-truncated output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use pigo_core::args::{optional_positive, required_str};
use pigo_core::{
    Ctx, Error, PropertySchema, Tool, ToolDefinition, ToolParameters, ToolResult,
};

use crate::sandbox::sanitize_env;

/// Default and floor for the per-command timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MIN_TIMEOUT_SECS: u64 = 1;

/// Output cap. The tail is kept: exit status and error text live there.
const MAX_OUTPUT_CHARS: usize = 10_000;

/// `/bin/sh -c` is used rather than bash: POSIX sh is available everywhere
/// this runs, and the tool description says so to the model.
const SHELL: &str = "/bin/sh";

pub struct BashTool {
    workdir: Option<std::path::PathBuf>,
}

impl BashTool {
    pub fn new() -> Self {
        Self { workdir: None }
    }

    pub fn with_workdir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a command under /bin/sh -c (POSIX shell). Stdout and stderr are merged; \
         output is truncated to the last 10000 characters. Default timeout 120s. \
         Commands run concurrently with other tool calls, so do not rely on ordering \
         between calls in the same turn."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("command", PropertySchema::string("Command to run"), true)
                .add_property(
                    "timeout",
                    PropertySchema::integer("Timeout in seconds (default 120, minimum 1)"),
                    false,
                ),
        )
    }

    async fn execute(&self, ctx: &Ctx, args: Value) -> ToolResult {
        let command = match required_str(&args, "command") {
            Ok(c) => c,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        if command.trim().is_empty() {
            return ToolResult::error("command is empty");
        }

        let timeout_secs = match optional_positive(&args, "timeout") {
            Ok(t) => t.unwrap_or(DEFAULT_TIMEOUT_SECS).max(MIN_TIMEOUT_SECS),
            Err(e) => return ToolResult::error(e.to_string()),
        };

        // The command's deadline layers on top of whatever the caller's ctx
        // already carries.
        let run_ctx = ctx.child_with_timeout(Duration::from_secs(timeout_secs));

        let mut cmd = Command::new(SHELL);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(sanitize_env())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        tracing::info!(command = %command, timeout_secs, "Executing bash command");

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ToolResult::error(format!("failed to spawn '{}': {}", SHELL, e)),
        };

        let output = tokio::select! {
            // Dropping the wait future drops the child; kill_on_drop
            // delivers SIGKILL. Partial output is discarded.
            err = run_ctx.done() => {
                return match err {
                    Error::Timeout(_) => ToolResult::error(format!(
                        "command timed out after {}s and was killed",
                        timeout_secs
                    )),
                    _ => ToolResult::error("command cancelled and killed"),
                };
            }
            output = child.wait_with_output() => match output {
                Ok(output) => output,
                Err(e) => return ToolResult::error(format!("failed to wait for command: {}", e)),
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut merged = String::new();
        if !stdout.trim().is_empty() {
            merged.push_str(stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            if !merged.is_empty() {
                merged.push('\n');
            }
            merged.push_str("STDERR: ");
            merged.push_str(stderr.trim_end());
        }

        let exit_code = output.status.code().unwrap_or(-1);
        if merged.is_empty() {
            merged = if exit_code == 0 {
                "(no output)".to_string()
            } else {
                format!("(no output, exit code {})", exit_code)
            };
        } else if exit_code != 0 {
            merged.push_str(&format!("\n[exit code {}]", exit_code));
        }

        let merged = tail_truncate(&merged, MAX_OUTPUT_CHARS);

        if output.status.success() {
            ToolResult::user(merged)
        } else {
            ToolResult::error(merged)
        }
    }
}

/// Keep the last `max` characters; errors and exit status live at the end.
fn tail_truncate(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let tail: String = text
        .chars()
        .skip(count - max)
        .collect();
    format!("(output truncated, showing last {} chars)\n{}", max, tail)
}
