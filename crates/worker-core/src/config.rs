use std::collections::HashSet;

/// Worker-wide configuration, read from the environment by the `worker` binary
/// and threaded through to every command handler in this crate.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker_url: String,
    pub worker_token: String,
    pub worker_id: String,
    pub state_dir: String,
    pub poll_interval_secs: u64,
    pub result_timeout_secs: u64,
    pub repos_base: String,
    pub repo_allowlist_path: String,
    pub cmd_timeout_secs: u64,
    pub max_output_bytes: usize,
    pub max_file_bytes: u64,
    pub max_lines: usize,
    pub worker_caps: Vec<String>,
    pub llm_cap: Option<String>,
}

/// Backoff applied between result/fail POST retries, in order of attempt.
pub const RESULT_RETRY_BACKOFF: [std::time::Duration; 2] = [
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(1000),
];
pub const RESULT_RETRY_ATTEMPTS: u32 = 3;

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let worker_id = std::env::var("WORKER_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "unknown-worker".to_string());

        let worker_caps_str = std::env::var("WORKER_CAPS").unwrap_or_default();
        let worker_caps: Vec<String> = worker_caps_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let llm_cap = std::env::var("LLM_CAP")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let state_dir = std::env::var("RUNNER_STATE_DIR")
            .unwrap_or_else(|_| "/var/lib/openclaw-runner/state".to_string());

        Ok(Self {
            broker_url: std::env::var("BROKER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string())
                .trim()
                .trim_end_matches('/')
                .to_string(),
            worker_token: std::env::var("WORKER_TOKEN").unwrap_or_default(),
            worker_id,
            state_dir,
            poll_interval_secs: env_u64("POLL_INTERVAL_SEC", 10),
            result_timeout_secs: env_u64("RESULT_TIMEOUT_SEC", 300),
            repos_base: std::env::var("RUNNER_REPOS_BASE")
                .unwrap_or_else(|_| "/home/jay/src".to_string()),
            repo_allowlist_path: std::env::var("RUNNER_REPO_ALLOWLIST")
                .unwrap_or_else(|_| "/etc/openclaw/repos.json".to_string()),
            cmd_timeout_secs: env_u64("RUNNER_CMD_TIMEOUT_SECONDS", 15),
            max_output_bytes: env_u64("RUNNER_MAX_OUTPUT_BYTES", 20000) as usize,
            max_file_bytes: env_u64("RUNNER_MAX_FILE_BYTES", 200000),
            max_lines: env_u64("RUNNER_MAX_LINES", 400) as usize,
            worker_caps,
            llm_cap,
        })
    }

    /// Repo allowlist fallback path alongside the plans directory.
    pub fn repos_json_fallback(&self) -> String {
        format!("{}/repos.json", self.state_dir)
    }

    pub fn plans_dir(&self) -> String {
        format!("{}/plans", self.state_dir)
    }

    /// Capabilities advertised in `X-Worker-Caps`: configured caps, the
    /// optional LLM cap, and always `repo_tools`, deduplicated.
    pub fn worker_caps_list(&self) -> Vec<String> {
        let mut caps = self.worker_caps.clone();
        if let Some(llm_cap) = &self.llm_cap {
            if !caps.contains(llm_cap) {
                caps.push(llm_cap.clone());
            }
        }
        if !caps.iter().any(|c| c == "repo_tools") {
            caps.push("repo_tools".to_string());
        }
        caps
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Configuration for the LLM tool-loop, read from the environment
/// independently of [`WorkerConfig`] (mirrors `LLM_*` variables).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub max_steps: u32,
    pub allowed_tools: HashSet<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_default()
            .trim()
            .trim_end_matches('/')
            .to_string();
        let api_key = std::env::var("LLM_API_KEY").unwrap_or_default().trim().to_string();
        let model = std::env::var("LLM_MODEL").unwrap_or_default().trim().to_string();
        let temperature = std::env::var("LLM_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.2);
        let max_tokens = env_u64("LLM_MAX_TOKENS", 4096) as u32;
        let max_steps = env_u64("LLM_TOOL_LOOP_MAX_STEPS", 6) as u32;

        let allowed_str = std::env::var("LLM_ALLOWED_TOOLS").unwrap_or_default();
        let mut allowed_tools: HashSet<String> = allowed_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if allowed_tools.is_empty() {
            allowed_tools = [
                "repo_list",
                "repo_status",
                "repo_last_commit",
                "repo_grep",
                "repo_readfile",
                "plan_echo",
                "approve_echo",
            ]
            .into_iter()
            .map(str::to_string)
            .collect();
        }

        Self {
            base_url,
            api_key,
            model,
            temperature,
            max_tokens,
            max_steps: max_steps.max(1),
            allowed_tools,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.model.is_empty()
    }
}
