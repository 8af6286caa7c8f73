//! OpenAI-compatible chat-completions client. Plain `reqwest` + `serde`, no
//! SDK — same style as this workspace's direct-API-calling examples.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCallFunction {
    name: String,
    arguments: String,
}

/// A single requested tool invocation, as returned by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// The assistant's turn: plain text, or a set of tool calls (never both
/// meaningfully — a model that emits both is treated as "has tool calls").
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Call `{base_url}/chat/completions` with the given messages and tool
/// schema. `messages` and `tools` are passed through as raw JSON values so
/// this client stays agnostic to the loop's message-history representation.
pub async fn chat_with_tools(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: &[Value],
    tools: &[Value],
) -> Result<ChatTurn> {
    let request = ChatRequest {
        model: &config.model,
        messages,
        tools: (!tools.is_empty()).then_some(tools),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let mut req = client
        .post(format!("{}/chat/completions", config.base_url))
        .json(&request);
    if !config.api_key.is_empty() {
        req = req.bearer_auth(&config.api_key);
    }

    let response = req.send().await.context("sending chat completion request")?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("LLM API error {status}: {body}");
    }

    let parsed: ChatResponse = response.json().await.context("parsing chat completion response")?;
    let Some(choice) = parsed.choices.into_iter().next() else {
        return Ok(ChatTurn { content: None, tool_calls: Vec::new() });
    };

    let content = choice
        .message
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    Ok(ChatTurn { content, tool_calls })
}
