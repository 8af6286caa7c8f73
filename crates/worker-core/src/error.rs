use thiserror::Error;

/// Errors surfaced while executing a job. The worker's poll loop converts any
/// `Err` into a `/jobs/{id}/fail` POST carrying `to_string()` as the message,
/// so variants should read as a user-facing explanation.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("repo not allowlisted")]
    RepoNotAllowlisted,

    #[error("repo path outside RUNNER_REPOS_BASE")]
    RepoPathEscape,

    #[error("not a git repo")]
    NotAGitRepo,

    #[error("path outside repo")]
    PathEscape,

    #[error("path must be relative and not contain ..")]
    UnsafePath,

    #[error("command timed out after {0}s")]
    CommandTimeout(u64),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("unknown plan_id")]
    UnknownPlanId,

    #[error("payload must be valid JSON")]
    InvalidPayload,

    #[error("LLM not configured (set LLM_BASE_URL and LLM_MODEL)")]
    LlmNotConfigured,

    #[error("llm_task tools must be subset of LLM_ALLOWED_TOOLS")]
    ToolsNotAllowed,

    #[error("tool not allowed: {0}")]
    ToolNotAllowed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
