use serde::{Deserialize, Serialize};

use broker_core::Job;

#[derive(Debug, Deserialize)]
pub struct JobCreateRequest {
    pub command: String,
    pub payload: String,
    #[serde(default)]
    pub requires: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobCreateResponse {
    pub id: String,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct JobResultRequest {
    pub result: String,
}

#[derive(Debug, Deserialize)]
pub struct JobFailRequest {
    #[serde(default = "default_error")]
    pub error: String,
}

fn default_error() -> String {
    "unknown".to_string()
}

#[derive(Debug, Serialize)]
pub struct TerminalResponse {
    pub ok: bool,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct NextJobResponse {
    pub job: Option<Job>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub ts_bound: bool,
}
