use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};
use worker_core::{LlmConfig, WorkerConfig, RESULT_RETRY_ATTEMPTS, RESULT_RETRY_BACKOFF};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,worker=debug,worker_core=debug".into()),
        )
        .init();

    let worker_config = WorkerConfig::from_env().context("loading worker configuration")?;
    let llm_config = LlmConfig::from_env();

    if worker_config.worker_token.is_empty() {
        anyhow::bail!("WORKER_TOKEN not set");
    }
    tokio::fs::create_dir_all(worker_config.plans_dir())
        .await
        .context("creating plans directory")?;

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;

    let caps_list = worker_config.worker_caps_list();
    let headers = build_headers(&worker_config, &caps_list)?;

    tracing::info!(
        broker = %worker_config.broker_url,
        worker_id = %worker_config.worker_id,
        poll_interval = worker_config.poll_interval_secs,
        caps = ?caps_list,
        "worker started"
    );

    loop {
        match poll_once(&http, &worker_config, &llm_config, &headers).await {
            Ok(true) => {}
            Ok(false) => {
                tokio::time::sleep(std::time::Duration::from_secs(worker_config.poll_interval_secs)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "poll error");
                tokio::time::sleep(std::time::Duration::from_secs(worker_config.poll_interval_secs)).await;
            }
        }
    }
}

fn build_headers(config: &WorkerConfig, caps_list: &[String]) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-worker-token"),
        HeaderValue::from_str(&config.worker_token).context("invalid WORKER_TOKEN header value")?,
    );
    headers.insert(
        HeaderName::from_static("x-worker-id"),
        HeaderValue::from_str(&config.worker_id).context("invalid WORKER_ID header value")?,
    );
    if !caps_list.is_empty() {
        let caps_json = serde_json::to_string(caps_list)?;
        headers.insert(
            HeaderName::from_static("x-worker-caps"),
            HeaderValue::from_str(&caps_json).context("invalid worker caps header value")?,
        );
    }
    Ok(headers)
}

/// Poll once: claim a job if one is available and run it to completion.
/// Returns `Ok(true)` if a job was processed, `Ok(false)` if the queue was
/// empty (caller should sleep before polling again).
async fn poll_once(
    http: &reqwest::Client,
    worker_config: &WorkerConfig,
    llm_config: &LlmConfig,
    headers: &HeaderMap,
) -> anyhow::Result<bool> {
    let response = http
        .get(format!("{}/jobs/next", worker_config.broker_url))
        .headers(headers.clone())
        .send()
        .await
        .context("GET /jobs/next failed")?
        .error_for_status()
        .context("GET /jobs/next returned an error status")?;

    let body: Value = response.json().await.context("parsing /jobs/next response")?;
    let Some(job) = body.get("job").filter(|v| !v.is_null()) else {
        return Ok(false);
    };

    let job_id = job
        .get("id")
        .and_then(Value::as_str)
        .context("claimed job missing id")?
        .to_string();
    let command = job.get("command").and_then(Value::as_str).unwrap_or("").to_string();
    let payload = job.get("payload").and_then(Value::as_str).unwrap_or("").to_string();

    tracing::info!(job_id = %job_id, command = %command, "job claimed");

    match worker_core::run_job(worker_config, llm_config, http, &command, &payload).await {
        Ok(result) => {
            let ok = post_with_retry(
                http,
                &format!("{}/jobs/{job_id}/result", worker_config.broker_url),
                headers,
                &json!({ "result": result }),
            )
            .await;
            if ok {
                tracing::info!(job_id = %job_id, "result posted");
            }
        }
        Err(e) => {
            let err_msg = e.to_string();
            tracing::warn!(job_id = %job_id, error = %err_msg, "job failed");
            let ok = post_with_retry(
                http,
                &format!("{}/jobs/{job_id}/fail", worker_config.broker_url),
                headers,
                &json!({ "error": err_msg }),
            )
            .await;
            if ok {
                tracing::info!(job_id = %job_id, "fail posted");
            }
        }
    }

    Ok(true)
}

/// POST a terminal transition with retry. 200 is terminal success; any other
/// 4xx is terminal failure (no retry, matching the broker's idempotency
/// rules — a repeat posting after a 4xx would not change the outcome); 5xx
/// and transport errors retry with backoff.
async fn post_with_retry(http: &reqwest::Client, url: &str, headers: &HeaderMap, body: &Value) -> bool {
    for attempt in 0..RESULT_RETRY_ATTEMPTS {
        match http.post(url).headers(headers.clone()).json(body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return true;
                }
                if status.is_client_error() {
                    let text = response.text().await.unwrap_or_default();
                    tracing::warn!(url, %status, body = %text, "terminal POST rejected, not retrying");
                    return false;
                }
                tracing::warn!(url, %status, attempt = attempt + 1, "terminal POST failed, retrying");
            }
            Err(e) => {
                tracing::warn!(url, error = %e, attempt = attempt + 1, "terminal POST request error");
            }
        }
        if attempt + 1 < RESULT_RETRY_ATTEMPTS {
            tokio::time::sleep(RESULT_RETRY_BACKOFF[attempt as usize]).await;
        }
    }
    false
}
