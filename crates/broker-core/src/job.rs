use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Job`]. `Done` and `Failed` are terminal; the only
/// re-entrant edge is `Running -> Queued`, taken opportunistically on lease expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// The sole persistent entity. Field presence is governed by `status`; see
/// the invariants in the broker's design docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub lease_until: Option<i64>,
    pub status: JobStatus,
    pub command: String,
    pub payload: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub worker_id: Option<String>,
    /// Raw JSON text, e.g. `{"caps":["llm:vllm"]}`. Opaque to the store; parsed
    /// on demand by [`crate::caps`].
    pub requires: Option<String>,
}

/// Outcome of a terminal-transition request (`/jobs/{id}/result` or `/jobs/{id}/fail`).
/// Both endpoints are idempotent once a job has settled, so a repeat call still
/// returns 200 with the job's actual final state rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// The job is (now, or already was) `done`.
    Done,
    /// A `result` was posted against a job that had already failed; ignored.
    DoneIgnoredAlreadyFailed,
    /// The job is (now, or already was) `failed`.
    Failed,
    /// A `fail` was posted against a job that had already succeeded; ignored.
    FailedIgnoredAlreadyDone,
}

impl TerminalOutcome {
    pub fn status_str(&self) -> &'static str {
        match self {
            TerminalOutcome::Done => "done",
            TerminalOutcome::DoneIgnoredAlreadyFailed => "failed",
            TerminalOutcome::Failed => "failed",
            TerminalOutcome::FailedIgnoredAlreadyDone => "done",
        }
    }

    pub fn note(&self) -> Option<&'static str> {
        match self {
            TerminalOutcome::DoneIgnoredAlreadyFailed => Some("already failed; result ignored"),
            TerminalOutcome::FailedIgnoredAlreadyDone => Some("already done; fail ignored"),
            _ => None,
        }
    }
}
