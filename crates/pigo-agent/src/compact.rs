//! Context compaction: summarize and splice out a prefix of the message
//! history when the character budget is exceeded.
//!
//! The system prompt at index 0 is never touched, a minimum number of
//! trailing messages is always preserved, and a cut never strands a tool
//! result from its originating assistant message. When the summarization
//! call fails the range is dropped with a short placeholder instead; the
//! enclosing turn never fails because compaction did.

use serde_json::Value;

use pigo_core::{estimate_chars, ChatClient, Ctx, Message, Role};

/// Fraction of `max_context_chars` at which compaction fires proactively.
const TRIGGER_RATIO: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub max_context_chars: usize,
    pub keep_recent_chars: usize,
    pub min_keep_messages: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_context_chars: 200_000,
            keep_recent_chars: 80_000,
            min_keep_messages: 10,
        }
    }
}

/// A selected cut: messages `1..cut_end` will be replaced by one synthetic
/// user message. The transcript and file-op lists are derived before the
/// splice so the memory pipeline can consume them too.
#[derive(Debug, Clone)]
pub struct CompactionPlan {
    pub cut_end: usize,
    pub transcript: String,
    pub files_read: Vec<String>,
    pub files_written: Vec<String>,
}

impl CompactionPlan {
    pub fn discarded_count(&self) -> usize {
        self.cut_end - 1
    }
}

pub fn needs_compaction(messages: &[Message], config: &CompactionConfig) -> bool {
    estimate_chars(messages) > (config.max_context_chars as f64 * TRIGGER_RATIO) as usize
}

/// Select the cut point and gather what the summary needs.
/// Returns None when there is nothing worth discarding.
pub fn plan(messages: &[Message], config: &CompactionConfig) -> Option<CompactionPlan> {
    if messages.len() < 2 {
        return None;
    }

    // Walk backward accumulating chars until the recent-window budget is
    // spent; everything older is the discard candidate.
    let mut kept_chars = 0usize;
    let mut cut_end = messages.len();
    while cut_end > 1 {
        let candidate = messages[cut_end - 1].char_count();
        if kept_chars + candidate > config.keep_recent_chars {
            break;
        }
        kept_chars += candidate;
        cut_end -= 1;
    }

    // Keep at least the trailing min_keep_messages, but never cut index 0.
    let min_keep_cut = messages.len().saturating_sub(config.min_keep_messages);
    cut_end = cut_end.min(min_keep_cut).max(1);

    // A cut landing on a tool result would strand it from its assistant
    // message; advance to the next non-tool boundary.
    while cut_end < messages.len() && messages[cut_end].role == Role::Tool {
        cut_end += 1;
    }

    if cut_end <= 1 {
        return None;
    }

    let discarded = &messages[1..cut_end];
    let (files_read, files_written) = extract_file_ops(discarded);

    Some(CompactionPlan {
        cut_end,
        transcript: build_transcript(discarded),
        files_read,
        files_written,
    })
}

/// Unique paths named in `read` calls vs `write`/`edit` calls over the
/// discarded prefix.
fn extract_file_ops(messages: &[Message]) -> (Vec<String>, Vec<String>) {
    let mut reads = Vec::new();
    let mut writes = Vec::new();

    for message in messages {
        for tc in &message.tool_calls {
            let target = match tc.name.as_str() {
                "read" => &mut reads,
                "write" | "edit" => &mut writes,
                _ => continue,
            };
            let Ok(args) = serde_json::from_str::<Value>(&tc.arguments) else {
                continue;
            };
            if let Some(path) = args.get("path").and_then(Value::as_str) {
                if !target.iter().any(|p| p == path) {
                    target.push(path.to_string());
                }
            }
        }
    }

    (reads, writes)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut)
}

/// One line per message/tool-call, capped so the summary request stays small.
fn build_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        match message.role {
            Role::Tool => {
                out.push_str(&format!(
                    "[tool result]: {}\n",
                    truncate_chars(&message.content, 300)
                ));
            }
            _ => {
                if !message.content.is_empty() {
                    out.push_str(&format!(
                        "[{}]: {}\n",
                        message.role,
                        truncate_chars(&message.content, 500)
                    ));
                }
                for tc in &message.tool_calls {
                    out.push_str(&format!(
                        "  -> {}({})\n",
                        tc.name,
                        truncate_chars(&tc.arguments, 200)
                    ));
                }
            }
        }
    }
    out
}

fn file_ops_section(plan: &CompactionPlan) -> String {
    let mut section = String::new();
    if !plan.files_read.is_empty() {
        section.push_str(&format!("Files read: {}\n", plan.files_read.join(", ")));
    }
    if !plan.files_written.is_empty() {
        section.push_str(&format!(
            "Files written: {}\n",
            plan.files_written.join(", ")
        ));
    }
    section
}

const SUMMARY_PROMPT: &str = "You condense earlier conversation history for an AI coding assistant. \
     Summarize what was discussed and done in 2-4 concise sentences. \
     Keep concrete details: file paths, decisions, error messages, outcomes. \
     Reply with the summary only.";

/// Execute a plan against the live message list. Infallible by design: a
/// failed summary degrades to naive truncation.
pub async fn summarize_and_splice(
    ctx: &Ctx,
    client: &dyn ChatClient,
    messages: &mut Vec<Message>,
    plan: CompactionPlan,
) {
    let request = vec![
        Message::system(SUMMARY_PROMPT),
        Message::user(format!(
            "{}\n{}",
            plan.transcript,
            file_ops_section(&plan)
        )),
    ];

    let replacement = match client.chat(ctx, &request, &[]).await {
        Ok(reply) if !reply.content.trim().is_empty() => {
            let mut content = format!(
                "[Earlier conversation summarized ({} messages)]\n{}",
                plan.discarded_count(),
                reply.content.trim()
            );
            let ops = file_ops_section(&plan);
            if !ops.is_empty() {
                content.push('\n');
                content.push_str(ops.trim_end());
            }
            content
        }
        Ok(_) | Err(_) => {
            tracing::warn!(
                dropped = plan.discarded_count(),
                "Summarization unavailable, falling back to naive truncation"
            );
            format!(
                "[{} earlier messages dropped to stay within the context budget]",
                plan.discarded_count()
            )
        }
    };

    messages.splice(1..plan.cut_end, [Message::user(replacement)]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pigo_core::testing::MockClient;
    use pigo_core::ToolCall;

    fn bulk_history(pairs: usize, chars_each: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("system prompt")];
        for i in 0..pairs {
            let body = "x".repeat(chars_each);
            if i % 2 == 0 {
                messages.push(Message::user(body));
            } else {
                messages.push(Message::assistant(body));
            }
        }
        messages
    }

    #[test]
    fn test_trigger_threshold() {
        let config = CompactionConfig::default();
        assert!(!needs_compaction(&bulk_history(10, 1000), &config));
        assert!(needs_compaction(&bulk_history(30, 10_000), &config));
    }

    #[test]
    fn test_plan_keeps_tail_and_system() {
        let config = CompactionConfig::default();
        let messages = bulk_history(30, 10_000);
        let plan = plan(&messages, &config).unwrap();

        // At least min_keep_messages survive at the tail.
        assert!(messages.len() - plan.cut_end >= config.min_keep_messages);
        assert!(plan.cut_end > 1);
        // 80k budget at 10k per message keeps roughly 8; the clamp widens
        // that to the 10-message floor.
        assert_eq!(messages.len() - plan.cut_end, 10);
    }

    #[test]
    fn test_plan_none_for_short_history() {
        let config = CompactionConfig::default();
        assert!(plan(&bulk_history(5, 100), &config).is_none());
        assert!(plan(&[Message::system("s")], &config).is_none());
    }

    #[test]
    fn test_cut_never_strands_tool_result() {
        let config = CompactionConfig {
            keep_recent_chars: 15,
            min_keep_messages: 2,
            ..Default::default()
        };
        let messages = vec![
            Message::system("s"),
            Message::user("u".repeat(100)),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c", "read", r#"{"path":"/tmp/a"}"#)],
            ),
            Message::tool_result("c", "r".repeat(5)),
            Message::user("aaaa"),
            Message::assistant("bbbb"),
        ];

        // The raw budget walk would cut at index 3 (the tool result); the
        // fix-up advances past it so the assistant/tool pair is discarded
        // together.
        let plan = plan(&messages, &config).unwrap();
        assert_eq!(plan.cut_end, 4);
        assert_ne!(messages[plan.cut_end].role, Role::Tool);
    }

    #[test]
    fn test_file_op_extraction() {
        let messages = vec![
            Message::assistant_with_tool_calls(
                "",
                vec![
                    ToolCall::new("c1", "read", r#"{"path":"/src/a.rs"}"#),
                    ToolCall::new("c2", "read", r#"{"path":"/src/a.rs"}"#),
                    ToolCall::new("c3", "edit", r#"{"path":"/src/b.rs","old_string":"x","new_string":"y"}"#),
                    ToolCall::new("c4", "write", r#"{"path":"/src/c.rs","content":""}"#),
                    ToolCall::new("c5", "bash", r#"{"command":"ls"}"#),
                    ToolCall::new("c6", "read", "not json"),
                ],
            ),
        ];
        let (reads, writes) = extract_file_ops(&messages);
        assert_eq!(reads, vec!["/src/a.rs"]);
        assert_eq!(writes, vec!["/src/b.rs", "/src/c.rs"]);
    }

    #[test]
    fn test_transcript_caps_lines() {
        let messages = vec![
            Message::user("u".repeat(2000)),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c", "bash", format!("{{\"command\":\"{}\"}}", "y".repeat(1000)))],
            ),
            Message::tool_result("c", "z".repeat(2000)),
        ];
        let transcript = build_transcript(&messages);
        for line in transcript.lines() {
            assert!(line.chars().count() <= 520, "line too long: {}", line.len());
        }
        assert!(transcript.contains("[user]"));
        assert!(transcript.contains("-> bash"));
        assert!(transcript.contains("[tool result]"));
    }

    #[tokio::test]
    async fn test_splice_preserves_system_and_shrinks() {
        let config = CompactionConfig::default();
        let mut messages = bulk_history(30, 10_000);
        let before_chars = estimate_chars(&messages);
        let tail: Vec<String> = messages[messages.len() - 10..]
            .iter()
            .map(|m| m.content.clone())
            .collect();

        let client = MockClient::new();
        client.queue_text("Earlier work summarized here.");

        let plan = plan(&messages, &config).unwrap();
        summarize_and_splice(&Ctx::new(), &client, &mut messages, plan).await;

        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "system prompt");
        assert!(messages[1].content.contains("Earlier work summarized here."));
        assert_eq!(messages[1].role, Role::User);
        assert!(estimate_chars(&messages) < before_chars);
        assert!(estimate_chars(&messages) < config.max_context_chars);

        // The pre-compaction tail survives verbatim.
        let after_tail: Vec<String> = messages[messages.len() - 10..]
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(tail, after_tail);
    }

    #[tokio::test]
    async fn test_fallback_naive_truncation() {
        let config = CompactionConfig::default();
        let mut messages = bulk_history(30, 10_000);

        // No queued response: the summary call errors.
        let client = MockClient::new();

        let plan = plan(&messages, &config).unwrap();
        let dropped = plan.discarded_count();
        summarize_and_splice(&Ctx::new(), &client, &mut messages, plan).await;

        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1]
            .content
            .contains(&format!("{} earlier messages dropped", dropped)));
    }
}
