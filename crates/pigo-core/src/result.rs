/// Uniform return envelope for every side-effecting operation.
///
/// `for_llm` always reaches the model. `for_user` is shown to the operator
/// only when non-empty and `silent` is false. Failures are values: a tool
/// that goes wrong returns `ToolResult::error(..)`, it never propagates an
/// `Err` or a panic to the loop.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub for_llm: String,
    pub for_user: String,
    pub silent: bool,
    pub is_error: bool,
}

impl ToolResult {
    /// Text for the model only.
    pub fn result(for_llm: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            ..Default::default()
        }
    }

    /// The model sees the text, the operator sees nothing.
    pub fn silent(for_llm: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            silent: true,
            ..Default::default()
        }
    }

    /// Model and operator see the same text (e.g. bash output).
    pub fn user(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            for_llm: text.clone(),
            for_user: text,
            ..Default::default()
        }
    }

    /// A one-line diagnostic the model can react to.
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            for_llm: msg.into(),
            is_error: true,
            ..Default::default()
        }
    }
}
