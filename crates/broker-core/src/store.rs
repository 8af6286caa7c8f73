use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::job::{Job, TerminalOutcome};

/// Policy-light persistence contract for the job table. The one implementation
/// in this workspace ([`SqliteJobStore`] in `broker-sqlite`) must serialize
/// writes through a single-writer transaction so that `claim_next` is atomic;
/// see the broker's design notes on `BEGIN IMMEDIATE`-equivalent semantics.
///
/// [`SqliteJobStore`]: ../broker_sqlite/struct.SqliteJobStore.html
#[async_trait]
pub trait BrokerStore: Send + Sync {
    /// Insert a new job in `queued` status. Returns the stored record.
    async fn create_job(
        &self,
        command: String,
        payload: String,
        requires: Option<String>,
    ) -> Result<Job, BrokerError>;

    /// Fetch a job by id, or `None` if unknown.
    async fn get_job(&self, id: &str) -> Result<Option<Job>, BrokerError>;

    /// Atomically requeue stale running jobs, then claim the oldest queued job
    /// whose `requires` is satisfied by `worker_caps`. Returns `None` if no
    /// queued job currently matches.
    async fn claim_next(
        &self,
        worker_id: Option<String>,
        worker_caps: HashSet<String>,
    ) -> Result<Option<Job>, BrokerError>;

    /// Terminal success. Idempotent: a repeat call, or a call against an
    /// already-failed job, mutates nothing and returns the job's actual state.
    /// Errors with [`BrokerError::NotFound`] if unknown, or
    /// [`BrokerError::BadRequest`] if the job was never claimed (still
    /// `queued`).
    async fn post_result(&self, id: &str, result: String) -> Result<TerminalOutcome, BrokerError>;

    /// Terminal failure. Idempotent in the same sense as [`Self::post_result`];
    /// unlike it, this accepts a job in `queued` or `running` status (the
    /// worker-side pre-claim failure path targets `queued` directly).
    async fn post_fail(&self, id: &str, error: String) -> Result<TerminalOutcome, BrokerError>;
}
