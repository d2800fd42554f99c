use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single tool invocation requested by the model.
///
/// `arguments` is kept as the raw JSON text the model produced; it is parsed
/// only at dispatch so a malformed payload becomes a tool-level error rather
/// than a loop-level failure. `id` is opaque and echoed verbatim on the
/// matching tool message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Count the characters this message contributes to the context window:
    /// content plus every tool-call argument payload plus the tool-call id
    /// echo. Compaction budgets are expressed in these units.
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
            + self
                .tool_calls
                .iter()
                .map(|tc| tc.id.len() + tc.name.len() + tc.arguments.chars().count())
                .sum::<usize>()
            + self.tool_call_id.as_ref().map(|id| id.len()).unwrap_or(0)
    }
}

/// Total character estimate for a message list.
pub fn estimate_chars(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.char_count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello, world!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, world!");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        let role: Role = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(role, Role::Tool);
    }

    #[test]
    fn test_tool_call_arguments_stay_raw() {
        let tc = ToolCall::new("c1", "read", r#"{"path": "/tmp/x"}"#);
        assert_eq!(tc.arguments, r#"{"path": "/tmp/x"}"#);
    }

    #[test]
    fn test_char_count_text() {
        let msg = Message::user("Hello, world!");
        assert_eq!(msg.char_count(), 13);
    }

    #[test]
    fn test_char_count_with_tool_calls() {
        let tc = ToolCall::new("c1", "read", r#"{"path":"/tmp"}"#);
        let msg = Message::assistant_with_tool_calls("", vec![tc]);
        // id "c1" (2) + name "read" (4) + arguments (15)
        assert_eq!(msg.char_count(), 21);
    }

    #[test]
    fn test_char_count_tool_result() {
        let msg = Message::tool_result("c1", "file contents here");
        assert_eq!(msg.char_count(), 20);
    }

    #[test]
    fn test_estimate_chars() {
        let messages = vec![Message::user("abcd"), Message::assistant("ef")];
        assert_eq!(estimate_chars(&messages), 6);
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = Message::assistant_with_tool_calls(
            "thinking",
            vec![ToolCall::new("c1", "bash", r#"{"command":"ls"}"#)],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.tool_calls[0].arguments, r#"{"command":"ls"}"#);
    }
}
