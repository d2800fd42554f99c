//! Session persistence: `~/.pigo/sessions/<id>.jsonl`, one
//! `{timestamp, message}` object per line. The system message is never
//! saved; it is rebuilt from config on load.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pigo_core::{Message, Role};

#[derive(Debug, Serialize, Deserialize)]
struct SessionLine {
    timestamp: DateTime<Utc>,
    message: Message,
}

/// Keep session names filesystem-safe.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn default_name() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

pub fn save(dir: &Path, name: Option<&str>, messages: &[Message]) -> Result<String> {
    let name = match name {
        Some(name) if !name.trim().is_empty() => sanitize_name(name.trim()),
        _ => default_name(),
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let now = Utc::now();
    let mut out = String::new();
    for message in messages {
        if message.role == Role::System {
            continue;
        }
        let line = SessionLine {
            timestamp: now,
            message: message.clone(),
        };
        out.push_str(&serde_json::to_string(&line)?);
        out.push('\n');
    }

    let path = dir.join(format!("{}.jsonl", name));
    std::fs::write(&path, out).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(name)
}

pub fn load(dir: &Path, name: &str) -> Result<Vec<Message>> {
    let path = dir.join(format!("{}.jsonl", sanitize_name(name.trim())));
    if !path.exists() {
        return Err(anyhow!("no session named '{}'", name));
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut messages = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: SessionLine =
            serde_json::from_str(line).with_context(|| format!("bad line in {}", path.display()))?;
        messages.push(parsed.message);
    }
    Ok(messages)
}

pub fn list(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let path: PathBuf = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                return None;
            }
            path.file_stem().map(|s| s.to_string_lossy().to_string())
        })
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use pigo_core::ToolCall;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_roundtrip_skips_system() {
        let dir = TempDir::new().unwrap();
        let messages = vec![
            Message::system("never saved"),
            Message::user("hello"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "read", r#"{"path":"/tmp/x"}"#)],
            ),
            Message::tool_result("c1", "data"),
            Message::assistant("done"),
        ];

        let name = save(dir.path(), Some("My Session!"), &messages).unwrap();
        assert_eq!(name, "My_Session_");

        let loaded = load(dir.path(), "My Session!").unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded[0].role, Role::User);
        assert_eq!(loaded[1].tool_calls[0].id, "c1");
        assert_eq!(loaded[2].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_default_name_stamped() {
        let dir = TempDir::new().unwrap();
        let name = save(dir.path(), None, &[Message::user("x")]).unwrap();
        assert_eq!(name.len(), "20260801-120000".len());
        assert!(list(dir.path()).contains(&name));
    }

    #[test]
    fn test_load_missing_session() {
        let dir = TempDir::new().unwrap();
        assert!(load(dir.path(), "nope").is_err());
    }

    #[test]
    fn test_list_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(list(&dir.path().join("missing")).is_empty());
    }
}
