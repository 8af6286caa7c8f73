//! Read-only repo sandbox: allowlisted git repos, resolved and canonicalized
//! against a base directory, queried only through argv-only subprocesses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Result envelope every `repo_*` command wraps its payload in. `plan_echo`
/// and `approve_echo` do not use this; they return their scaffold directly.
#[derive(Debug, Serialize)]
pub struct RepoEnvelope {
    pub ok: bool,
    pub worker_id: String,
    pub command: &'static str,
    pub repo: Option<String>,
    pub truncated: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

fn envelope_ok(
    worker_id: &str,
    command: &'static str,
    repo: Option<String>,
    data: serde_json::Value,
    truncated: bool,
) -> String {
    serde_json::to_string(&RepoEnvelope {
        ok: true,
        worker_id: worker_id.to_string(),
        command,
        repo,
        truncated,
        data: Some(data),
        error: None,
    })
    .expect("envelope serialization cannot fail")
}

/// Load the repo allowlist from `RUNNER_REPO_ALLOWLIST`, falling back to
/// `<state_dir>/repos.json`. Any read/parse failure yields an empty map
/// rather than an error, matching the reference runner's best-effort load.
pub fn load_allowlist(config: &WorkerConfig) -> HashMap<String, String> {
    for path in [
        config.repo_allowlist_path.clone(),
        config.repos_json_fallback(),
    ] {
        if path.is_empty() {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(serde_json::Value::Object(obj)) = serde_json::from_str(&contents) else {
            continue;
        };
        return obj
            .into_iter()
            .map(|(k, v)| (k, value_to_string(&v)))
            .collect();
    }
    HashMap::new()
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve an allowlisted repo name to a canonical absolute path, refusing to
/// leave `RUNNER_REPOS_BASE` even via symlinks.
pub fn resolve_repo_path(config: &WorkerConfig, name: &str) -> Result<PathBuf, WorkerError> {
    let allowlist = load_allowlist(config);
    let value = allowlist.get(name).ok_or(WorkerError::RepoNotAllowlisted)?;
    let base_real = std::fs::canonicalize(&config.repos_base).map_err(WorkerError::Io)?;

    let candidate = if Path::new(value).is_absolute() {
        PathBuf::from(value)
    } else {
        base_real.join(value)
    };
    let resolved = std::fs::canonicalize(&candidate).map_err(|_| WorkerError::RepoPathEscape)?;
    if resolved != base_real && !resolved.starts_with(&base_real) {
        return Err(WorkerError::RepoPathEscape);
    }
    Ok(resolved)
}

fn ensure_git_repo(repo_path: &Path) -> Result<(), WorkerError> {
    if !repo_path.join(".git").is_dir() {
        return Err(WorkerError::NotAGitRepo);
    }
    Ok(())
}

/// Run `argv[0]` with the rest as arguments, no shell, in `cwd`, bounded by
/// `RUNNER_CMD_TIMEOUT_SECONDS`. Returns `(stdout, stderr, exit_code)`.
pub async fn run_cmd(
    config: &WorkerConfig,
    argv: &[&str],
    cwd: &Path,
) -> Result<(String, String, i32), WorkerError> {
    let mut cmd = Command::new(argv[0]);
    cmd.args(&argv[1..]).current_dir(cwd).kill_on_drop(true);

    let output = tokio::time::timeout(
        Duration::from_secs(config.cmd_timeout_secs),
        cmd.output(),
    )
    .await
    .map_err(|_| WorkerError::CommandTimeout(config.cmd_timeout_secs))?
    .map_err(WorkerError::Io)?;

    Ok((
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
        output.status.code().unwrap_or(-1),
    ))
}

/// Truncate a string to at most `max_bytes` UTF-8 bytes, discarding any
/// trailing partial codepoint.
pub fn truncate_bytes(s: &str, max_bytes: usize) -> String {
    let bytes = s.as_bytes();
    if bytes.len() <= max_bytes {
        return s.to_string();
    }
    String::from_utf8_lossy(&bytes[..max_bytes]).into_owned()
}

pub async fn repo_list(config: &WorkerConfig, worker_id: &str) -> String {
    let allowlist = load_allowlist(config);
    let mut repos = Vec::new();
    for name in allowlist.keys() {
        if let Ok(path) = resolve_repo_path(config, name) {
            if ensure_git_repo(&path).is_ok() {
                repos.push(serde_json::json!({ "name": name, "path": path.to_string_lossy() }));
            }
        }
    }
    envelope_ok(worker_id, "repo_list", None, serde_json::json!({ "repos": repos }), false)
}

pub async fn repo_status(
    config: &WorkerConfig,
    worker_id: &str,
    repo_name: &str,
) -> Result<String, WorkerError> {
    let repo_path = resolve_repo_path(config, repo_name)?;
    ensure_git_repo(&repo_path)?;

    let (out, err, _) = run_cmd(config, &["git", "rev-parse", "--abbrev-ref", "HEAD"], &repo_path).await?;
    let branch = (out + &err).trim().lines().next().unwrap_or("").to_string();

    let (out2, err2, _) = run_cmd(config, &["git", "status", "--porcelain=v1"], &repo_path).await?;
    let mut porcelain = (out2 + &err2).trim().to_string();
    let dirty = !porcelain.is_empty();
    let mut truncated = false;
    if porcelain.len() > config.max_output_bytes {
        porcelain = truncate_bytes(&porcelain, config.max_output_bytes);
        truncated = true;
    }

    let data = serde_json::json!({ "repo": repo_name, "branch": branch, "dirty": dirty, "porcelain": porcelain });
    Ok(envelope_ok(worker_id, "repo_status", Some(repo_name.to_string()), data, truncated))
}

pub async fn repo_last_commit(
    config: &WorkerConfig,
    worker_id: &str,
    repo_name: &str,
) -> Result<String, WorkerError> {
    let repo_path = resolve_repo_path(config, repo_name)?;
    ensure_git_repo(&repo_path)?;

    let (out, err, code) = run_cmd(
        config,
        &["git", "log", "-1", "--pretty=format:%H%n%an%n%ad%n%s"],
        &repo_path,
    )
    .await?;
    if code != 0 {
        let msg = (out + &err).trim().to_string();
        return Err(WorkerError::InvalidArgument(if msg.is_empty() {
            "git log failed".to_string()
        } else {
            msg
        }));
    }
    let mut lines = out.trim().lines();
    let data = serde_json::json!({
        "hash": lines.next().unwrap_or(""),
        "author": lines.next().unwrap_or(""),
        "date": lines.next().unwrap_or(""),
        "subject": lines.next().unwrap_or(""),
    });
    Ok(envelope_ok(worker_id, "repo_last_commit", Some(repo_name.to_string()), data, false))
}

pub async fn repo_grep(
    config: &WorkerConfig,
    worker_id: &str,
    repo_name: &str,
    query: &str,
    path_prefix: &str,
) -> Result<String, WorkerError> {
    let repo_path = resolve_repo_path(config, repo_name)?;
    ensure_git_repo(&repo_path)?;

    let has_rg = which_rg();
    let mut argv: Vec<&str> = if has_rg {
        vec!["rg", "-n", "--no-heading", "--smart-case", query]
    } else {
        vec!["git", "grep", "-n", query, "--"]
    };
    if !path_prefix.is_empty() {
        argv.push(path_prefix);
    }

    let (out, err, code) = run_cmd(config, &argv, &repo_path).await?;
    if code != 0 && code != 1 {
        let msg = (out + &err).trim().to_string();
        return Err(WorkerError::InvalidArgument(if msg.is_empty() {
            "search failed".to_string()
        } else {
            msg
        }));
    }
    let mut combined = out.trim().to_string();
    let mut truncated = false;
    if combined.len() > config.max_output_bytes {
        combined = truncate_bytes(&combined, config.max_output_bytes);
        truncated = true;
    }
    let data = serde_json::json!({ "matches": combined });
    Ok(envelope_ok(worker_id, "repo_grep", Some(repo_name.to_string()), data, truncated))
}

fn which_rg() -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join("rg").is_file())
        })
        .unwrap_or(false)
}

pub async fn repo_readfile(
    config: &WorkerConfig,
    worker_id: &str,
    repo_name: &str,
    path: &str,
    start: i64,
    end: i64,
) -> Result<String, WorkerError> {
    let normalized = Path::new(path);
    if path.starts_with('/') || normalized.components().any(|c| c.as_os_str() == "..") {
        return Err(WorkerError::UnsafePath);
    }
    let repo_path = resolve_repo_path(config, repo_name)?;
    ensure_git_repo(&repo_path)?;

    if start < 1 {
        return Err(WorkerError::InvalidArgument("start must be >= 1".to_string()));
    }
    if end < start {
        return Err(WorkerError::InvalidArgument("end must be >= start".to_string()));
    }
    if (end - start + 1) as usize > config.max_lines {
        return Err(WorkerError::InvalidArgument(format!(
            "line range exceeds RUNNER_MAX_LINES ({})",
            config.max_lines
        )));
    }

    let abs_path = repo_path.join(path);
    let real_abs = std::fs::canonicalize(&abs_path).map_err(|_| WorkerError::InvalidArgument("not a file or not found".to_string()))?;
    if real_abs != repo_path && !real_abs.starts_with(&repo_path) {
        return Err(WorkerError::PathEscape);
    }
    let metadata = tokio::fs::metadata(&real_abs)
        .await
        .map_err(|_| WorkerError::InvalidArgument("not a file or not found".to_string()))?;
    if !metadata.is_file() {
        return Err(WorkerError::InvalidArgument("not a file or not found".to_string()));
    }
    if metadata.len() > config.max_file_bytes {
        return Err(WorkerError::InvalidArgument(format!(
            "file exceeds RUNNER_MAX_FILE_BYTES ({})",
            config.max_file_bytes
        )));
    }

    let raw = tokio::fs::read(&real_abs).await.map_err(WorkerError::Io)?;
    let text = String::from_utf8_lossy(&raw);
    // split_inclusive keeps each line's own terminator, so a selected line
    // that isn't the file's last line still ends in "\n" in the output.
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let max_line = lines.len() as i64;
    let start1 = start.max(1).min(max_line.max(1));
    let mut end1 = end.min(max_line);
    if end1 < start1 {
        end1 = start1;
    }

    let mut truncated = (end - start + 1) as usize > config.max_lines;
    let mut content_lines: Vec<&str> = lines
        .get((start1 - 1).max(0) as usize..end1.max(0) as usize)
        .unwrap_or(&[])
        .to_vec();
    if content_lines.len() > config.max_lines {
        content_lines.truncate(config.max_lines);
        truncated = true;
    }
    let content = content_lines.concat();

    let data = serde_json::json!({ "path": path, "start": start1, "end": end1, "content": content });
    Ok(envelope_ok(worker_id, "repo_readfile", Some(repo_name.to_string()), data, truncated))
}
