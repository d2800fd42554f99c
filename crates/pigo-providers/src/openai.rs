//! OpenAI-compatible chat and embedding client.
//!
//! Supports the classic chat-completions endpoint and the newer responses
//! endpoint behind the same `ChatClient` trait; which one is used is a
//! configuration choice (`api_type`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use pigo_core::error::is_overflow_text;
use pigo_core::{
    ChatClient, ChatResponse, Ctx, Error, FinishReason, Message, Role, ToolCall, ToolDefinition,
    Usage,
};

use crate::retry::{Backoff, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    Chat,
    Responses,
}

impl ApiType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Some(ApiType::Chat),
            "responses" => Some(ApiType::Responses),
            _ => None,
        }
    }
}

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    embed_model: String,
    api_type: ApiType,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            api_type: ApiType::Chat,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn with_api_type(mut self, api_type: ApiType) -> Self {
        self.api_type = api_type;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// POST a JSON body, retrying transient failures with backoff. The ctx
    /// aborts both in-flight requests and backoff sleeps.
    async fn post_with_retry(&self, ctx: &Ctx, url: &str, body: Value) -> Result<Value, Error> {
        let mut backoff = Backoff::new(self.retry.clone());

        loop {
            ctx.check()?;

            let outcome = self.post_once(ctx, url, &body).await;
            let (err, hint) = match outcome {
                Ok(value) => return Ok(value),
                Err(pair) => pair,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            let Some(delay) = backoff.next_delay(hint) else {
                return Err(err);
            };
            debug!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying provider request"
            );
            ctx.run(tokio::time::sleep(delay)).await?;
        }
    }

    async fn post_once(
        &self,
        ctx: &Ctx,
        url: &str,
        body: &Value,
    ) -> Result<Value, (Error, Option<Duration>)> {
        let request = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send();

        let response = match ctx.run(request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let err = if e.is_timeout() {
                    Error::timeout(e.to_string())
                } else {
                    Error::network(e.to_string())
                };
                return Err((err, None));
            }
            Err(e) => return Err((e, None)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(parse_error_response(status, response).await);
        }

        match ctx.run(response.json::<Value>()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err((Error::serialization(e.to_string()), None)),
            Err(e) => Err((e, None)),
        }
    }

    // --- chat completions ---

    fn build_chat_body(&self, messages: &[Message], tools: &[ToolDefinition]) -> Value {
        let wire_messages: Vec<Value> = messages.iter().map(chat_wire_message).collect();
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(|t| t.to_wire()).collect());
        }
        body
    }

    fn parse_chat_response(&self, value: Value) -> Result<ChatResponse, Error> {
        let choice = value["choices"]
            .get(0)
            .ok_or_else(|| Error::api(500, "no choices in response"))?;
        let message = &choice["message"];

        let content = message["content"].as_str().unwrap_or_default().to_string();
        let tool_calls: Vec<ToolCall> = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|tc| {
                        Some(ToolCall::new(
                            tc["id"].as_str()?,
                            tc["function"]["name"].as_str()?,
                            tc["function"]["arguments"].as_str().unwrap_or("{}"),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = match choice["finish_reason"].as_str() {
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => {
                if tool_calls.is_empty() {
                    FinishReason::Stop
                } else {
                    FinishReason::ToolCalls
                }
            }
        };

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason,
            usage: parse_usage(&value["usage"]),
        })
    }

    // --- responses API ---

    fn build_responses_body(&self, messages: &[Message], tools: &[ToolDefinition]) -> Value {
        let mut input = Vec::new();
        for message in messages {
            match message.role {
                Role::Tool => {
                    input.push(serde_json::json!({
                        "type": "function_call_output",
                        "call_id": message.tool_call_id.clone().unwrap_or_default(),
                        "output": message.content,
                    }));
                }
                Role::Assistant if !message.tool_calls.is_empty() => {
                    if !message.content.is_empty() {
                        input.push(serde_json::json!({
                            "role": "assistant",
                            "content": message.content,
                        }));
                    }
                    for tc in &message.tool_calls {
                        input.push(serde_json::json!({
                            "type": "function_call",
                            "call_id": tc.id,
                            "name": tc.name,
                            "arguments": tc.arguments,
                        }));
                    }
                }
                _ => {
                    input.push(serde_json::json!({
                        "role": message.role.to_string(),
                        "content": message.content,
                    }));
                }
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "input": input,
        });
        if !tools.is_empty() {
            // The responses API flattens the function wrapper.
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    fn parse_responses_response(&self, value: Value) -> Result<ChatResponse, Error> {
        let output = value["output"]
            .as_array()
            .ok_or_else(|| Error::api(500, "no output in response"))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();

        for item in output {
            match item["type"].as_str() {
                Some("message") => {
                    if let Some(parts) = item["content"].as_array() {
                        for part in parts {
                            if part["type"].as_str() == Some("output_text") {
                                content.push_str(part["text"].as_str().unwrap_or_default());
                            }
                        }
                    }
                }
                Some("function_call") => {
                    if let (Some(id), Some(name)) =
                        (item["call_id"].as_str(), item["name"].as_str())
                    {
                        tool_calls.push(ToolCall::new(
                            id,
                            name,
                            item["arguments"].as_str().unwrap_or("{}"),
                        ));
                    }
                }
                _ => {}
            }
        }

        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason,
            usage: parse_usage(&value["usage"]),
        })
    }
}

fn chat_wire_message(message: &Message) -> Value {
    let mut wire = serde_json::json!({
        "role": message.role.to_string(),
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {"name": tc.name, "arguments": tc.arguments},
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = Value::String(id.clone());
    }
    wire
}

fn parse_usage(value: &Value) -> Usage {
    // Chat uses prompt/completion_tokens; responses uses input/output_tokens.
    let prompt = value["prompt_tokens"]
        .as_u64()
        .or_else(|| value["input_tokens"].as_u64())
        .unwrap_or(0) as u32;
    let completion = value["completion_tokens"]
        .as_u64()
        .or_else(|| value["output_tokens"].as_u64())
        .unwrap_or(0) as u32;
    Usage::new(prompt, completion)
}

/// Map an error response to our taxonomy, extracting any retry hint.
async fn parse_error_response(
    status: StatusCode,
    response: Response,
) -> (Error, Option<Duration>) {
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response.text().await.unwrap_or_default();
    let (message, code) = match serde_json::from_str::<Value>(&body) {
        Ok(parsed) => {
            let message = parsed["error"]["message"]
                .as_str()
                .unwrap_or(&body)
                .to_string();
            let code = parsed["error"]["code"].as_str().map(|s| s.to_string());
            (message, code)
        }
        Err(_) => (body, None),
    };

    if is_overflow_text(code.as_deref(), &message) {
        return (Error::context_overflow(message), None);
    }

    let err = match status.as_u16() {
        401 | 403 => Error::auth(message),
        429 => Error::rate_limit(message),
        400 => Error::invalid_argument(message),
        status => Error::api(status, message),
    };
    (err, retry_after)
}

#[async_trait]
impl ChatClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        ctx: &Ctx,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, Error> {
        match self.api_type {
            ApiType::Chat => {
                let body = self.build_chat_body(messages, tools);
                let url = format!("{}/chat/completions", self.base_url);
                let value = self.post_with_retry(ctx, &url, body).await?;
                self.parse_chat_response(value)
            }
            ApiType::Responses => {
                let body = self.build_responses_body(messages, tools);
                let url = format!("{}/responses", self.base_url);
                let value = self.post_with_retry(ctx, &url, body).await?;
                self.parse_responses_response(value)
            }
        }
    }

    async fn embed(&self, ctx: &Ctx, text: &str) -> Result<Vec<f32>, Error> {
        let body = serde_json::json!({
            "model": self.embed_model,
            "input": text,
        });
        let url = format!("{}/embeddings", self.base_url);
        let value = self.post_with_retry(ctx, &url, body).await?;

        value["data"][0]["embedding"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .ok_or_else(|| Error::serialization("no embedding in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiClient {
        OpenAiClient::new("sk-test")
    }

    #[test]
    fn test_api_type_parse() {
        assert_eq!(ApiType::parse("chat"), Some(ApiType::Chat));
        assert_eq!(ApiType::parse("RESPONSES"), Some(ApiType::Responses));
        assert_eq!(ApiType::parse("completions"), None);
    }

    #[test]
    fn test_chat_body_shape() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "read", r#"{"path":"/tmp/x"}"#)],
            ),
            Message::tool_result("c1", "     1\tabc\n"),
        ];
        let tools = vec![ToolDefinition::new("read", "Read a file")];
        let body = client().build_chat_body(&messages, &tools);

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["tool_calls"][0]["id"], "c1");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"/tmp/x"}"#
        );
        assert_eq!(body["messages"][3]["tool_call_id"], "c1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "read");
    }

    #[test]
    fn test_parse_chat_response_with_tool_calls() {
        let value = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "c9",
                        "type": "function",
                        "function": {"name": "bash", "arguments": "{\"command\":\"ls\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        });
        let response = client().parse_chat_response(value).unwrap();
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.tool_calls[0].id, "c9");
        assert_eq!(response.tool_calls[0].arguments, "{\"command\":\"ls\"}");
        assert_eq!(response.usage.total_tokens, 19);
    }

    #[test]
    fn test_parse_chat_response_text() {
        let value = serde_json::json!({
            "choices": [{
                "message": {"content": "Hello! How can I help?"},
                "finish_reason": "stop"
            }]
        });
        let response = client().parse_chat_response(value).unwrap();
        assert_eq!(response.content, "Hello! How can I help?");
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn test_responses_body_round_trips_tool_messages() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "read", "{}")],
            ),
            Message::tool_result("c1", "data"),
        ];
        let body = client().build_responses_body(&messages, &[]);
        let input = body["input"].as_array().unwrap();
        assert_eq!(input[0]["role"], "user");
        assert_eq!(input[1]["type"], "function_call");
        assert_eq!(input[1]["call_id"], "c1");
        assert_eq!(input[2]["type"], "function_call_output");
        assert_eq!(input[2]["output"], "data");
    }

    #[test]
    fn test_parse_responses_output() {
        let value = serde_json::json!({
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "Done."}]},
                {"type": "function_call", "call_id": "c2", "name": "grep", "arguments": "{}"}
            ],
            "usage": {"input_tokens": 3, "output_tokens": 4}
        });
        let response = client().parse_responses_response(value).unwrap();
        assert_eq!(response.content, "Done.");
        assert_eq!(response.tool_calls[0].name, "grep");
        assert_eq!(response.usage.total_tokens, 7);
    }

    #[test]
    fn test_parse_usage_both_shapes() {
        let chat = serde_json::json!({"prompt_tokens": 5, "completion_tokens": 2});
        assert_eq!(parse_usage(&chat).total_tokens, 7);
        let responses = serde_json::json!({"input_tokens": 1, "output_tokens": 1});
        assert_eq!(parse_usage(&responses).total_tokens, 2);
        assert_eq!(parse_usage(&Value::Null).total_tokens, 0);
    }
}
