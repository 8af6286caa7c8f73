//! OpenAI-style function-calling schema for the tools the LLM loop may call,
//! plus the dispatcher that executes one by name.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::{plans, repo};

/// `(name, schema)` pairs backing [`get_tools_schema`]. Kept as a function
/// rather than a `static` so the schema is plain data built once per call —
/// this list is small and called rarely enough that it doesn't matter.
fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "repo_list",
                "description": "List allowlisted git repos available on the runner.",
                "parameters": { "type": "object", "properties": {}, "required": [] },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "repo_status",
                "description": "Get git status (branch, dirty, porcelain) for a repo.",
                "parameters": {
                    "type": "object",
                    "properties": { "repo": { "type": "string", "description": "Repo name from allowlist" } },
                    "required": ["repo"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "repo_last_commit",
                "description": "Get last commit hash, author, date, subject for a repo.",
                "parameters": {
                    "type": "object",
                    "properties": { "repo": { "type": "string", "description": "Repo name from allowlist" } },
                    "required": ["repo"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "repo_grep",
                "description": "Search for a query in a repo (ripgrep or git grep).",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "repo": { "type": "string", "description": "Repo name from allowlist" },
                        "query": { "type": "string", "description": "Search query" },
                        "path": { "type": "string", "description": "Optional path prefix to limit search" },
                    },
                    "required": ["repo", "query"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "repo_readfile",
                "description": "Read a file in a repo by path and line range.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "repo": { "type": "string", "description": "Repo name from allowlist" },
                        "path": { "type": "string", "description": "Relative path within repo" },
                        "start_line": { "type": "integer", "description": "First line (1-based)", "default": 1 },
                        "end_line": { "type": "integer", "description": "Last line (inclusive)", "default": 200 },
                    },
                    "required": ["repo", "path"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "plan_echo",
                "description": "Create a plan (echo scaffold) with the given text; returns plan_id for approve.",
                "parameters": {
                    "type": "object",
                    "properties": { "text": { "type": "string", "description": "Plan summary or description" } },
                    "required": ["text"],
                },
            },
        }),
        json!({
            "type": "function",
            "function": {
                "name": "approve_echo",
                "description": "Approve a plan by plan_id (echo scaffold).",
                "parameters": {
                    "type": "object",
                    "properties": { "plan_id": { "type": "string", "description": "Plan ID from plan_echo" } },
                    "required": ["plan_id"],
                },
            },
        }),
    ]
}

/// Filter the full tool list down to `allowed_tools`, in definition order.
pub fn get_tools_schema(allowed_tools: &HashSet<String>) -> Vec<Value> {
    tool_definitions()
        .into_iter()
        .filter(|def| {
            def["function"]["name"]
                .as_str()
                .map(|name| allowed_tools.contains(name))
                .unwrap_or(false)
        })
        .collect()
}

/// Parse a tool call's `arguments` string (JSON object, possibly empty).
pub fn parse_tool_args(arguments: &str) -> Result<Value, WorkerError> {
    let trimmed = arguments.trim();
    if trimmed.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| WorkerError::InvalidArgument(format!("invalid tool arguments JSON: {e}")))
}

/// Optional per-job defaults the `llm_task` payload may supply, applied when
/// a tool call omits `repo`/`path`.
pub struct RepoContext {
    pub repo: Option<String>,
    pub path_hint: Option<String>,
}

/// Execute one tool call. `allowed_tools` is the worker's effective allowlist
/// (after the job's own subset check); a name outside it is refused even if
/// the model hallucinates a call for it.
pub async fn dispatch(
    config: &WorkerConfig,
    worker_id: &str,
    name: &str,
    args: &Value,
    repo_context: Option<&RepoContext>,
    allowed_tools: &HashSet<String>,
) -> Result<String, WorkerError> {
    if !allowed_tools.contains(name) {
        return Err(WorkerError::ToolNotAllowed(name.to_string()));
    }

    let repo_arg = args.get("repo").and_then(Value::as_str).filter(|s| !s.is_empty());
    let repo = repo_arg
        .map(str::to_string)
        .or_else(|| repo_context.and_then(|c| c.repo.clone()));
    let path_hint = repo_context.and_then(|c| c.path_hint.clone()).unwrap_or_default();

    match name {
        "repo_list" => Ok(repo::repo_list(config, worker_id).await),
        "repo_status" => {
            let repo = repo.ok_or_else(|| WorkerError::InvalidArgument("repo required".to_string()))?;
            repo::repo_status(config, worker_id, &repo).await
        }
        "repo_last_commit" => {
            let repo = repo.ok_or_else(|| WorkerError::InvalidArgument("repo required".to_string()))?;
            repo::repo_last_commit(config, worker_id, &repo).await
        }
        "repo_grep" => {
            let repo = repo.ok_or_else(|| WorkerError::InvalidArgument("repo required".to_string()))?;
            let query = args.get("query").and_then(Value::as_str).unwrap_or("");
            let path = args
                .get("path")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(&path_hint);
            repo::repo_grep(config, worker_id, &repo, query, path).await
        }
        "repo_readfile" => {
            let repo = repo.ok_or_else(|| WorkerError::InvalidArgument("repo required".to_string()))?;
            let path = args
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| WorkerError::InvalidArgument("path required".to_string()))?;
            let start = args.get("start_line").and_then(Value::as_i64).unwrap_or(1);
            let end = args.get("end_line").and_then(Value::as_i64).unwrap_or(200);
            repo::repo_readfile(config, worker_id, &repo, path, start, end).await
        }
        "plan_echo" => {
            let text = args.get("text").and_then(Value::as_str).unwrap_or("");
            plans::plan_echo(&config.plans_dir(), text).await
        }
        "approve_echo" => {
            let plan_id = args
                .get("plan_id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| WorkerError::InvalidArgument("plan_id required".to_string()))?;
            plans::approve_echo(&config.plans_dir(), plan_id).await
        }
        other => Err(WorkerError::InvalidArgument(format!("unknown tool: {other}"))),
    }
}

/// Parse the `repo_context` field of an `llm_task` payload, if present.
pub fn parse_repo_context(value: Option<&Value>) -> Option<RepoContext> {
    let obj = value?.as_object()?;
    Some(RepoContext {
        repo: obj.get("repo").and_then(Value::as_str).map(str::to_string),
        path_hint: obj.get("path_hint").and_then(Value::as_str).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_filters_to_allowed_set() {
        let mut allowed = HashSet::new();
        allowed.insert("repo_list".to_string());
        let schema = get_tools_schema(&allowed);
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0]["function"]["name"], "repo_list");
    }

    #[test]
    fn parse_tool_args_empty_is_empty_object() {
        let parsed = parse_tool_args("").unwrap();
        assert_eq!(parsed, json!({}));
    }

    #[test]
    fn parse_tool_args_rejects_invalid_json() {
        assert!(parse_tool_args("{not json").is_err());
    }

    #[tokio::test]
    async fn dispatch_refuses_tool_outside_allowlist() {
        let tmp = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            broker_url: "http://127.0.0.1:8000".into(),
            worker_token: "tok".into(),
            worker_id: "w".into(),
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
        let allowed = HashSet::new();
        let err = dispatch(&config, "w", "repo_list", &json!({}), None, &allowed)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::ToolNotAllowed(_)));
    }
}
