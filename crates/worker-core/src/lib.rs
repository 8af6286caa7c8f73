//! The worker's command vocabulary, repo sandbox, plan scaffolds, and LLM
//! tool loop. The `worker` binary owns the poll loop and wires env config
//! into [`dispatch::run_job`] for each claimed job.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod plans;
pub mod repo;

pub use config::{LlmConfig, WorkerConfig, RESULT_RETRY_ATTEMPTS, RESULT_RETRY_BACKOFF};
pub use dispatch::run_job;
pub use error::WorkerError;
