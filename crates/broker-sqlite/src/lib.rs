//! SQLite implementation of the broker's [`BrokerStore`].
//!
//! # Features
//!
//! - Atomic claim via `BEGIN IMMEDIATE`, matching sqlite's single-writer model
//! - Opportunistic requeue of stale (lease-expired) running jobs, folded into
//!   the same transaction as the claim
//! - Idempotent terminal transitions (`post_result`/`post_fail`)
//! - Capability-gated candidate selection (`requires ⊆ offered`)
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!   id TEXT PRIMARY KEY,
//!   created_at INTEGER NOT NULL,
//!   status TEXT NOT NULL,
//!   command TEXT NOT NULL,
//!   payload TEXT NOT NULL,
//!   result TEXT,
//!   finished_at INTEGER,
//!   error TEXT,
//!   started_at INTEGER,
//!   lease_until INTEGER,
//!   worker_id TEXT,
//!   requires TEXT
//! );
//! CREATE INDEX idx_jobs_status_created ON jobs(status, created_at);
//! CREATE INDEX idx_jobs_status_lease ON jobs(status, lease_until);
//! CREATE INDEX idx_jobs_worker_id ON jobs(worker_id);
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use broker_sqlite::SqliteJobStore;
//!
//! let store = SqliteJobStore::connect("broker.db", 60).await?;
//! store.migrate().await?;
//! ```

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use broker_core::{job_matches_worker, BrokerError, BrokerStore, Job, JobStatus, TerminalOutcome};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Row};

/// Max queued rows pulled per claim attempt before capability filtering.
/// Keeps the filter cheap; see the broker's design notes on folding
/// `requires` into the SQL predicate once queues grow large.
const CLAIM_CANDIDATE_LIMIT: i64 = 50;

/// SQLite-backed job store.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    lease_seconds: i64,
}

impl SqliteJobStore {
    /// Open (creating if absent) the sqlite file at `path` and run migrations.
    ///
    /// `busy_timeout` is set to 10s, mirroring the broker's tolerance for
    /// write contention under rapid worker polling.
    pub async fn connect(path: &str, lease_seconds: i64) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool, lease_seconds };
        store.init().await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Construct directly from an existing pool (used by tests).
    pub fn from_pool(pool: SqlitePool, lease_seconds: i64) -> Self {
        Self { pool, lease_seconds }
    }

    async fn init(&self) -> anyhow::Result<()> {
        self.pool
            .execute(
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                  id TEXT PRIMARY KEY,
                  created_at INTEGER NOT NULL,
                  status TEXT NOT NULL,
                  command TEXT NOT NULL,
                  payload TEXT NOT NULL,
                  result TEXT,
                  finished_at INTEGER
                )
                "#,
            )
            .await?;
        self.pool
            .execute("CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at)")
            .await?;
        Ok(())
    }

    /// Add later-sprint columns and indexes if missing. Safe to run repeatedly
    /// against an existing database.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        let existing: HashSet<String> = sqlx::query("PRAGMA table_info(jobs)")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        for (col, ddl) in [
            ("error", "ALTER TABLE jobs ADD COLUMN error TEXT"),
            ("started_at", "ALTER TABLE jobs ADD COLUMN started_at INTEGER"),
            ("lease_until", "ALTER TABLE jobs ADD COLUMN lease_until INTEGER"),
            ("worker_id", "ALTER TABLE jobs ADD COLUMN worker_id TEXT"),
            ("requires", "ALTER TABLE jobs ADD COLUMN requires TEXT"),
        ] {
            if !existing.contains(col) {
                self.pool.execute(ddl).await?;
            }
        }

        self.pool
            .execute("CREATE INDEX IF NOT EXISTS idx_jobs_status_lease ON jobs(status, lease_until)")
            .await?;
        self.pool
            .execute("CREATE INDEX IF NOT EXISTS idx_jobs_worker_id ON jobs(worker_id)")
            .await?;
        Ok(())
    }

    /// Expose the pool for callers that need a health check.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, BrokerError> {
    let status_str: String = row.get("status");
    let status = JobStatus::from_str(&status_str)
        .ok_or_else(|| BrokerError::Internal(anyhow::anyhow!("corrupt status: {status_str}")))?;
    Ok(Job {
        id: row.get("id"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        lease_until: row.get("lease_until"),
        status,
        command: row.get("command"),
        payload: row.get("payload"),
        result: row.get("result"),
        error: row.get("error"),
        worker_id: row.get("worker_id"),
        requires: row.get("requires"),
    })
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl BrokerStore for SqliteJobStore {
    async fn create_job(
        &self,
        command: String,
        payload: String,
        requires: Option<String>,
    ) -> Result<Job, BrokerError> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now();
        sqlx::query(
            "INSERT INTO jobs(id, created_at, status, command, payload, requires) VALUES(?,?,?,?,?,?)",
        )
        .bind(&id)
        .bind(created_at)
        .bind(JobStatus::Queued.as_str())
        .bind(&command)
        .bind(&payload)
        .bind(&requires)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::Internal(e.into()))?;

        Ok(Job {
            id,
            created_at,
            started_at: None,
            finished_at: None,
            lease_until: None,
            status: JobStatus::Queued,
            command,
            payload,
            result: None,
            error: None,
            worker_id: None,
            requires,
        })
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, BrokerError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BrokerError::Internal(e.into()))?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn claim_next(
        &self,
        worker_id: Option<String>,
        worker_caps: HashSet<String>,
    ) -> Result<Option<Job>, BrokerError> {
        let now_ts = now();
        let lease_until = now_ts + self.lease_seconds;

        let mut conn = self.pool.acquire().await.map_err(|e| BrokerError::Internal(e.into()))?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| BrokerError::Internal(e.into()))?;

        let claimed = self
            .claim_next_locked(&mut conn, now_ts, lease_until, worker_id, &worker_caps)
            .await;

        match claimed {
            Ok(result) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| BrokerError::Internal(e.into()))?;
                Ok(result)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn post_result(&self, id: &str, result: String) -> Result<TerminalOutcome, BrokerError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BrokerError::Internal(e.into()))?
            .ok_or(BrokerError::NotFound)?;
        let status = JobStatus::from_str(row.get::<String, _>("status").as_str())
            .ok_or_else(|| BrokerError::Internal(anyhow::anyhow!("corrupt status")))?;

        match status {
            JobStatus::Done => Ok(TerminalOutcome::Done),
            JobStatus::Failed => Ok(TerminalOutcome::DoneIgnoredAlreadyFailed),
            JobStatus::Queued => Err(BrokerError::BadRequest(
                "job not in running state: queued".to_string(),
            )),
            JobStatus::Running => {
                sqlx::query(
                    "UPDATE jobs SET status = 'done', result = ?, finished_at = ?, lease_until = NULL WHERE id = ?",
                )
                .bind(&result)
                .bind(now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| BrokerError::Internal(e.into()))?;
                Ok(TerminalOutcome::Done)
            }
        }
    }

    async fn post_fail(&self, id: &str, error: String) -> Result<TerminalOutcome, BrokerError> {
        let row = sqlx::query("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BrokerError::Internal(e.into()))?
            .ok_or(BrokerError::NotFound)?;
        let status = JobStatus::from_str(row.get::<String, _>("status").as_str())
            .ok_or_else(|| BrokerError::Internal(anyhow::anyhow!("corrupt status")))?;

        match status {
            JobStatus::Done => Ok(TerminalOutcome::FailedIgnoredAlreadyDone),
            JobStatus::Failed => Ok(TerminalOutcome::Failed),
            JobStatus::Queued | JobStatus::Running => {
                let err = {
                    let trimmed = error.trim();
                    if trimmed.is_empty() {
                        "unknown".to_string()
                    } else {
                        trimmed.to_string()
                    }
                };
                sqlx::query(
                    "UPDATE jobs SET status = 'failed', error = ?, finished_at = ?, lease_until = NULL WHERE id = ?",
                )
                .bind(&err)
                .bind(now())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| BrokerError::Internal(e.into()))?;
                Ok(TerminalOutcome::Failed)
            }
        }
    }
}

impl SqliteJobStore {
    /// The atomic claim algorithm, run inside the caller's `BEGIN IMMEDIATE`
    /// transaction. Steps: requeue stale runs, pull the oldest queued
    /// candidates, pick the first capability match, claim it with a
    /// `WHERE status = 'queued'` guard so a racing requeue or double-claim
    /// cannot double-assign.
    async fn claim_next_locked(
        &self,
        conn: &mut sqlx::SqliteConnection,
        now_ts: i64,
        lease_until: i64,
        worker_id: Option<String>,
        worker_caps: &HashSet<String>,
    ) -> Result<Option<Job>, BrokerError> {
        sqlx::query(
            r#"UPDATE jobs
               SET status = 'queued', started_at = NULL, lease_until = NULL,
                   finished_at = NULL, result = NULL, error = NULL, worker_id = NULL
               WHERE status = 'running' AND lease_until IS NOT NULL AND lease_until < ?"#,
        )
        .bind(now_ts)
        .execute(&mut *conn)
        .await
        .map_err(|e| BrokerError::Internal(e.into()))?;

        let candidates = sqlx::query(
            "SELECT id, requires FROM jobs WHERE status = 'queued' ORDER BY created_at ASC LIMIT ?",
        )
        .bind(CLAIM_CANDIDATE_LIMIT)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| BrokerError::Internal(e.into()))?;

        let mut job_id = None;
        for row in &candidates {
            let requires: Option<String> = row.get("requires");
            if job_matches_worker(requires.as_deref(), worker_caps) {
                job_id = Some(row.get::<String, _>("id"));
                break;
            }
        }
        let Some(job_id) = job_id else {
            return Ok(None);
        };

        let claim = sqlx::query(
            r#"UPDATE jobs
               SET status = 'running', started_at = ?, lease_until = ?, worker_id = ?,
                   error = NULL, result = NULL, finished_at = NULL
               WHERE id = ? AND status = 'queued'"#,
        )
        .bind(now_ts)
        .bind(lease_until)
        .bind(&worker_id)
        .bind(&job_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| BrokerError::Internal(e.into()))?;

        if claim.rows_affected() != 1 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(&job_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| BrokerError::Internal(e.into()))?;
        Ok(Some(row_to_job(&row)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteJobStore {
        // A single shared connection: separate connections to ":memory:" are
        // independent databases, so the pool must stay at size 1 here.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(":memory:")
                    .busy_timeout(Duration::from_secs(10)),
            )
            .await
            .unwrap();
        let store = SqliteJobStore { pool, lease_seconds: 60 };
        store.init().await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_then_claim_sets_running() {
        let store = test_store().await;
        let job = store
            .create_job("ping".into(), "hello".into(), None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let claimed = store
            .claim_next(Some("w1".into()), HashSet::new())
            .await
            .unwrap()
            .expect("job should be claimable");
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.worker_id.as_deref(), Some("w1"));
        assert!(claimed.lease_until.is_some());
    }

    #[tokio::test]
    async fn claim_on_empty_queue_is_none() {
        let store = test_store().await;
        assert!(store
            .claim_next(None, HashSet::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn capability_mismatch_is_not_claimed() {
        let store = test_store().await;
        store
            .create_job(
                "llm_task".into(),
                "{}".into(),
                Some(r#"{"caps":["llm:vllm"]}"#.into()),
            )
            .await
            .unwrap();
        assert!(store
            .claim_next(None, HashSet::new())
            .await
            .unwrap()
            .is_none());

        let mut caps = HashSet::new();
        caps.insert("llm:vllm".to_string());
        assert!(store.claim_next(None, caps).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn result_is_idempotent() {
        let store = test_store().await;
        let job = store.create_job("ping".into(), "x".into(), None).await.unwrap();
        store.claim_next(None, HashSet::new()).await.unwrap();
        let first = store.post_result(&job.id, "ok".into()).await.unwrap();
        assert_eq!(first, TerminalOutcome::Done);
        let second = store.post_result(&job.id, "ignored".into()).await.unwrap();
        assert_eq!(second, TerminalOutcome::Done);
        let fetched = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.result.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn result_on_queued_job_is_bad_request() {
        let store = test_store().await;
        let job = store.create_job("ping".into(), "x".into(), None).await.unwrap();
        let err = store.post_result(&job.id, "ok".into()).await.unwrap_err();
        assert!(matches!(err, BrokerError::BadRequest(_)));
    }

    #[tokio::test]
    async fn fail_after_done_is_ignored() {
        let store = test_store().await;
        let job = store.create_job("ping".into(), "x".into(), None).await.unwrap();
        store.claim_next(None, HashSet::new()).await.unwrap();
        store.post_result(&job.id, "ok".into()).await.unwrap();
        let outcome = store.post_fail(&job.id, "oops".into()).await.unwrap();
        assert_eq!(outcome, TerminalOutcome::FailedIgnoredAlreadyDone);
        let fetched = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn expired_lease_is_requeued_to_new_worker() {
        let store = test_store().await;
        let job = store.create_job("ping".into(), "x".into(), None).await.unwrap();
        store
            .claim_next(Some("worker-one".into()), HashSet::new())
            .await
            .unwrap();
        sqlx::query("UPDATE jobs SET lease_until = 0 WHERE id = ?")
            .bind(&job.id)
            .execute(&store.pool)
            .await
            .unwrap();
        let reclaimed = store
            .claim_next(Some("worker-two".into()), HashSet::new())
            .await
            .unwrap()
            .expect("stale job should be requeued and reclaimed");
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.worker_id.as_deref(), Some("worker-two"));
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let store = test_store().await;
        let err = store.post_result("nope", "x".into()).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotFound));
    }
}
