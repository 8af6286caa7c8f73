//! Top-level command dispatch: maps a job's `(command, payload)` onto the
//! worker's command vocabulary and returns the result string the worker
//! posts back to the broker.

use serde_json::{json, Value};

use crate::config::{LlmConfig, WorkerConfig};
use crate::error::WorkerError;
use crate::llm::{parse_repo_context, run_llm_tool_loop};
use crate::{plans, repo};

fn parse_payload(payload: &str) -> Result<Value, WorkerError> {
    if payload.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(payload).map_err(|_| WorkerError::InvalidPayload)
}

fn require_str<'a>(obj: &'a Value, key: &str) -> Result<&'a str, WorkerError> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WorkerError::InvalidArgument(format!("{key} required")))
}

/// Execute a job. Errors here are posted to `/jobs/{id}/fail` by the poll
/// loop; `Ok` results are posted to `/jobs/{id}/result` verbatim.
pub async fn run_job(
    worker_config: &WorkerConfig,
    llm_config: &LlmConfig,
    http: &reqwest::Client,
    command: &str,
    payload: &str,
) -> Result<String, WorkerError> {
    match command {
        "ping" => Ok(format!("pong: {payload}")),

        "capabilities" => Ok(capabilities_response(worker_config)),

        "plan_echo" => plans::plan_echo(&worker_config.plans_dir(), payload).await,

        "approve_echo" => {
            let plan_id = payload.trim();
            if plan_id.is_empty() {
                return Err(WorkerError::InvalidArgument("plan_id required".to_string()));
            }
            plans::approve_echo(&worker_config.plans_dir(), plan_id).await
        }

        "repo_list" => Ok(repo::repo_list(worker_config, &worker_config.worker_id).await),

        "repo_status" => {
            let obj = parse_payload(payload)?;
            let name = require_str(&obj, "repo")?;
            repo::repo_status(worker_config, &worker_config.worker_id, name).await
        }

        "repo_last_commit" => {
            let obj = parse_payload(payload)?;
            let name = require_str(&obj, "repo")?;
            repo::repo_last_commit(worker_config, &worker_config.worker_id, name).await
        }

        "repo_grep" => {
            let obj = parse_payload(payload)?;
            let name = require_str(&obj, "repo")?;
            let query = obj.get("query").and_then(Value::as_str).unwrap_or("");
            let path = obj.get("path").and_then(Value::as_str).unwrap_or("");
            repo::repo_grep(worker_config, &worker_config.worker_id, name, query, path).await
        }

        "repo_readfile" => {
            let obj = parse_payload(payload)?;
            let name = require_str(&obj, "repo")?;
            let path = require_str(&obj, "path")?;
            let start = obj.get("start").and_then(Value::as_i64).unwrap_or(1);
            let end = obj.get("end").and_then(Value::as_i64).unwrap_or(200);
            repo::repo_readfile(worker_config, &worker_config.worker_id, name, path, start, end).await
        }

        "llm_task" => run_llm_task(worker_config, llm_config, http, payload).await,

        other => Ok(format!("unknown command: {other}")),
    }
}

fn capabilities_response(worker_config: &WorkerConfig) -> String {
    let mut caps = vec![
        "ping",
        "capabilities",
        "plan_echo",
        "approve_echo",
        "repo_list",
        "repo_status",
        "repo_last_commit",
        "repo_grep",
        "repo_readfile",
        "llm_task",
    ]
    .into_iter()
    .map(str::to_string)
    .collect::<Vec<_>>();

    for cap in worker_config.worker_caps_list() {
        if cap.starts_with("llm:") && !caps.contains(&cap) {
            caps.push(cap);
        }
    }

    serde_json::to_string(&json!({
        "worker_id": worker_config.worker_id,
        "capabilities": caps,
        "version": "mvp",
    }))
    .expect("capabilities serialization cannot fail")
}

async fn run_llm_task(
    worker_config: &WorkerConfig,
    llm_config: &LlmConfig,
    http: &reqwest::Client,
    payload: &str,
) -> Result<String, WorkerError> {
    let obj = parse_payload(payload).map_err(|_| {
        WorkerError::InvalidArgument("llm_task payload must be valid JSON".to_string())
    })?;
    let prompt = obj
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WorkerError::InvalidArgument("llm_task payload must include prompt".to_string()))?;

    if !llm_config.is_configured() {
        return Err(WorkerError::LlmNotConfigured);
    }

    let tools_requested: Vec<String> = obj
        .get("tools")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let tools_for_loop: Vec<String> = if tools_requested.is_empty() {
        llm_config.allowed_tools.iter().cloned().collect()
    } else {
        if !tools_requested.iter().all(|t| llm_config.allowed_tools.contains(t)) {
            return Err(WorkerError::ToolsNotAllowed);
        }
        tools_requested
    };

    let repo_context = parse_repo_context(obj.get("repo_context"));
    let max_steps = obj
        .get("max_steps")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(llm_config.max_steps)
        .max(1);

    let envelope = run_llm_tool_loop(
        http,
        worker_config,
        llm_config,
        prompt,
        &tools_for_loop,
        repo_context.as_ref(),
        max_steps,
    )
    .await;

    Ok(serde_json::to_string(&json!({
        "final": envelope.final_answer,
        "tool_calls": envelope.tool_calls,
        "model": envelope.model,
        "worker_id": envelope.worker_id,
        "safety": envelope.safety,
    }))
    .expect("llm_task envelope serialization cannot fail"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn test_worker_config(tmp: &std::path::Path) -> WorkerConfig {
        WorkerConfig {
            broker_url: "http://127.0.0.1:8000".into(),
            worker_token: "tok".into(),
            worker_id: "w1".into(),
            state_dir: tmp.to_string_lossy().into_owned(),
            poll_interval_secs: 10,
            result_timeout_secs: 300,
            repos_base: tmp.to_string_lossy().into_owned(),
            repo_allowlist_path: tmp.join("repos.json").to_string_lossy().into_owned(),
            cmd_timeout_secs: 15,
            max_output_bytes: 20000,
            max_file_bytes: 200000,
            max_lines: 400,
            worker_caps: vec!["llm:vllm".to_string()],
            llm_cap: None,
        }
    }

    fn test_llm_config() -> LlmConfig {
        LlmConfig {
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            temperature: 0.2,
            max_tokens: 256,
            max_steps: 3,
            allowed_tools: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn ping_echoes_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let http = reqwest::Client::new();
        let result = run_job(&test_worker_config(tmp.path()), &test_llm_config(), &http, "ping", "hello")
            .await
            .unwrap();
        assert_eq!(result, "pong: hello");
    }

    #[tokio::test]
    async fn capabilities_lists_vocabulary_and_llm_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let http = reqwest::Client::new();
        let result = run_job(&test_worker_config(tmp.path()), &test_llm_config(), &http, "capabilities", "")
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result).unwrap();
        let caps: Vec<String> = parsed["capabilities"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(caps.contains(&"llm_task".to_string()));
        assert!(caps.contains(&"llm:vllm".to_string()));
    }

    #[tokio::test]
    async fn unknown_command_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let http = reqwest::Client::new();
        let result = run_job(&test_worker_config(tmp.path()), &test_llm_config(), &http, "frobnicate", "")
            .await
            .unwrap();
        assert_eq!(result, "unknown command: frobnicate");
    }

    #[tokio::test]
    async fn repo_status_without_repo_field_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let http = reqwest::Client::new();
        let err = run_job(&test_worker_config(tmp.path()), &test_llm_config(), &http, "repo_status", "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn llm_task_without_config_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let http = reqwest::Client::new();
        let err = run_job(
            &test_worker_config(tmp.path()),
            &test_llm_config(),
            &http,
            "llm_task",
            &json!({ "prompt": "hi" }).to_string(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkerError::LlmNotConfigured));
    }

    #[tokio::test]
    async fn llm_task_requires_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let http = reqwest::Client::new();
        let mut llm_config = test_llm_config();
        llm_config.base_url = "http://127.0.0.1:1".to_string();
        llm_config.model = "test".to_string();
        let err = run_job(&test_worker_config(tmp.path()), &llm_config, &http, "llm_task", "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn llm_task_rejects_tools_outside_allowed_set() {
        let tmp = tempfile::tempdir().unwrap();
        let http = reqwest::Client::new();
        let mut llm_config = test_llm_config();
        llm_config.base_url = "http://127.0.0.1:1".to_string();
        llm_config.model = "test".to_string();
        llm_config.allowed_tools.insert("repo_list".to_string());
        let payload = json!({ "prompt": "hi", "tools": ["repo_grep"] }).to_string();
        let err = run_job(&test_worker_config(tmp.path()), &llm_config, &http, "llm_task", &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::ToolsNotAllowed));
    }
}
