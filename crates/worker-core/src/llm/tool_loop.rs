//! Bounded tool-calling loop: send messages to the model, execute any tool
//! calls it requests, feed results back, repeat until a final answer or
//! `max_steps` is exhausted.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{LlmConfig, WorkerConfig};
use crate::llm::client::{chat_with_tools, ChatTurn};
use crate::llm::tool_registry::{dispatch, get_tools_schema, parse_tool_args, RepoContext};

const TOOL_OUTPUT_MAX_BYTES: usize = 8000;

fn truncate_for_audit(s: &str) -> (String, bool) {
    let bytes = s.as_bytes();
    if bytes.len() <= TOOL_OUTPUT_MAX_BYTES {
        return (s.to_string(), false);
    }
    (String::from_utf8_lossy(&bytes[..TOOL_OUTPUT_MAX_BYTES]).into_owned(), true)
}

#[derive(Debug, Serialize)]
pub struct ToolCallAudit {
    pub name: String,
    pub args: Value,
    pub status: &'static str,
    pub truncated_output: String,
}

#[derive(Debug, Serialize)]
pub struct LlmTaskEnvelope {
    pub final_answer: String,
    pub tool_calls: Vec<ToolCallAudit>,
    pub model: String,
    pub worker_id: String,
    pub safety: Value,
}

/// Run the loop end to end and return the result envelope. `tools_requested`
/// has already passed the job's subset-of-`LLM_ALLOWED_TOOLS` check in the
/// caller; here it is further intersected with `llm_config.allowed_tools` to
/// build the tool list *offered to the model*. Dispatch itself is still
/// guarded against the full `llm_config.allowed_tools` set, not this
/// per-call subset — matching the original bridge, whose `allowed_tools` is
/// the process-level set regardless of what a given call offered the model.
pub async fn run_llm_tool_loop(
    http: &reqwest::Client,
    worker_config: &WorkerConfig,
    llm_config: &LlmConfig,
    prompt: &str,
    tools_requested: &[String],
    repo_context: Option<&RepoContext>,
    max_steps: u32,
) -> LlmTaskEnvelope {
    let allowed = &llm_config.allowed_tools;
    let tools_to_use: HashSet<String> = if tools_requested.is_empty() {
        allowed.clone()
    } else {
        tools_requested
            .iter()
            .filter(|t| allowed.contains(*t))
            .cloned()
            .collect()
    };
    let tools_to_use = if tools_to_use.is_empty() { allowed.clone() } else { tools_to_use };

    let tools_schema = get_tools_schema(&tools_to_use);
    if tools_schema.is_empty() {
        return LlmTaskEnvelope {
            final_answer: "No tools available or configured.".to_string(),
            tool_calls: Vec::new(),
            model: llm_config.model.clone(),
            worker_id: worker_config.worker_id.clone(),
            safety: json!({ "reason": "no_tools" }),
        };
    }

    let system_content = format!(
        "You are a helpful assistant with access to read-only repo tools (repo_list, repo_status, repo_grep, repo_readfile, etc.) \
         and plan_echo/approve_echo. Use the provided tools to answer the user. \
         You have at most {max_steps} tool-call rounds. \
         Tool output may be truncated. When you have enough information, respond with a final answer in plain text (no tool calls)."
    );

    let mut messages: Vec<Value> = vec![
        json!({ "role": "system", "content": system_content }),
        json!({ "role": "user", "content": prompt }),
    ];
    let mut tool_calls_audit = Vec::new();
    let mut final_text: Option<String> = None;
    let mut safety = serde_json::Map::new();
    let mut step = 0;

    while step < max_steps {
        step += 1;
        let turn = match chat_with_tools(http, llm_config, &messages, &tools_schema).await {
            Ok(turn) => turn,
            Err(e) => {
                safety.insert("error".to_string(), json!(e.to_string()));
                final_text = Some(format!("LLM request failed: {e}"));
                break;
            }
        };

        if turn.tool_calls.is_empty() {
            final_text = Some(turn.content.unwrap_or_else(|| "(no response)".to_string()));
            break;
        }

        append_assistant_turn(&mut messages, &turn);

        for tc in &turn.tool_calls {
            let args = match parse_tool_args(&tc.arguments) {
                Ok(args) => args,
                Err(e) => {
                    tool_calls_audit.push(ToolCallAudit {
                        name: tc.name.clone(),
                        args: json!(tc.arguments),
                        status: "error",
                        truncated_output: e.to_string(),
                    });
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": tc.id,
                        "content": format!("Error: {e}"),
                    }));
                    continue;
                }
            };

            match dispatch(worker_config, &worker_config.worker_id, &tc.name, &args, repo_context, allowed).await {
                Ok(result) => {
                    let (truncated_result, was_truncated) = truncate_for_audit(&result);
                    if was_truncated {
                        let count = safety.get("truncations").and_then(Value::as_u64).unwrap_or(0);
                        safety.insert("truncations".to_string(), json!(count + 1));
                    }
                    tool_calls_audit.push(ToolCallAudit {
                        name: tc.name.clone(),
                        args: args.clone(),
                        status: "ok",
                        truncated_output: truncated_result.clone(),
                    });
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": tc.id,
                        "content": truncated_result,
                    }));
                }
                Err(e) => {
                    tool_calls_audit.push(ToolCallAudit {
                        name: tc.name.clone(),
                        args: args.clone(),
                        status: "error",
                        truncated_output: e.to_string(),
                    });
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": tc.id,
                        "content": format!("Error: {e}"),
                    }));
                }
            }
        }
    }

    let final_answer = final_text.unwrap_or_else(|| {
        safety.insert("max_steps_reached".to_string(), json!(true));
        "Max tool steps reached without final answer.".to_string()
    });

    LlmTaskEnvelope {
        final_answer,
        tool_calls: tool_calls_audit,
        model: llm_config.model.clone(),
        worker_id: worker_config.worker_id.clone(),
        safety: Value::Object(safety),
    }
}

fn append_assistant_turn(messages: &mut Vec<Value>, turn: &ChatTurn) {
    let tool_calls: Vec<Value> = turn
        .tool_calls
        .iter()
        .map(|tc| {
            json!({
                "id": tc.id,
                "type": "function",
                "function": { "name": tc.name, "arguments": tc.arguments },
            })
        })
        .collect();
    messages.push(json!({
        "role": "assistant",
        "content": turn.content,
        "tool_calls": tool_calls,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_tools_configured_returns_safety_reason() {
        let tmp = tempfile::tempdir().unwrap();
        let worker_config = WorkerConfig {
            broker_url: "http://127.0.0.1:8000".into(),
            worker_token: "tok".into(),
            worker_id: "w1".into(),
            state_dir: tmp.path().to_string_lossy().into_owned(),
            poll_interval_secs: 10,
            result_timeout_secs: 300,
            repos_base: tmp.path().to_string_lossy().into_owned(),
            repo_allowlist_path: tmp.path().join("repos.json").to_string_lossy().into_owned(),
            cmd_timeout_secs: 15,
            max_output_bytes: 20000,
            max_file_bytes: 200000,
            max_lines: 400,
            worker_caps: vec![],
            llm_cap: None,
        };
        let llm_config = LlmConfig {
            base_url: "http://127.0.0.1:1".into(),
            api_key: String::new(),
            model: "test-model".into(),
            temperature: 0.2,
            max_tokens: 256,
            max_steps: 3,
            allowed_tools: HashSet::new(),
        };
        let http = reqwest::Client::new();
        let envelope = run_llm_tool_loop(&http, &worker_config, &llm_config, "hi", &[], None, 3).await;
        assert_eq!(envelope.safety["reason"], "no_tools");
        assert_eq!(envelope.final_answer, "No tools available or configured.");
    }
}
