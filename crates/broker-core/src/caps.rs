//! Capability-based routing: parsing of `X-Worker-Caps` and a job's `requires`
//! descriptor, and the subset match between them.

use std::collections::HashSet;

/// Parse `X-Worker-Caps`: either a JSON array of strings or a comma-separated
/// list. Absent or unparseable input yields an empty set (any worker may still
/// claim jobs that declare no requirements).
pub fn parse_worker_caps(header_value: Option<&str>) -> HashSet<String> {
    let Some(raw) = header_value else {
        return HashSet::new();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return HashSet::new();
    }
    if trimmed.starts_with('[') {
        if let Ok(serde_json::Value::Array(arr)) = serde_json::from_str(trimmed) {
            return arr
                .into_iter()
                .filter_map(|v| {
                    let s = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    let s = s.trim().to_string();
                    (!s.is_empty()).then_some(s)
                })
                .collect();
        }
    }
    trimmed
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a job's `requires` JSON text, e.g. `{"caps":["llm:vllm"]}`.
/// Returns `None` when `requires` is absent, blank, invalid JSON, or carries
/// no `caps` key — all of which mean "any worker may run this job".
pub fn job_required_caps(requires: Option<&str>) -> Option<HashSet<String>> {
    let raw = requires?.trim();
    if raw.is_empty() {
        return None;
    }
    let obj: serde_json::Value = serde_json::from_str(raw).ok()?;
    let caps = obj.get("caps")?;
    if caps.is_null() {
        return None;
    }
    let arr = caps.as_array()?;
    Some(
        arr.iter()
            .filter_map(|v| {
                let s = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => return None,
                    other => other.to_string(),
                };
                let s = s.trim().to_string();
                (!s.is_empty()).then_some(s)
            })
            .collect(),
    )
}

/// True if a job with the given `requires` descriptor is claimable by a worker
/// offering `worker_caps`: no requirements, or `required ⊆ offered`.
pub fn job_matches_worker(requires: Option<&str>, worker_caps: &HashSet<String>) -> bool {
    match job_required_caps(requires) {
        None => true,
        Some(required) if required.is_empty() => true,
        Some(required) => required.is_subset(worker_caps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_caps() {
        let caps = parse_worker_caps(Some(r#"["llm:vllm", "repo_tools"]"#));
        assert_eq!(caps.len(), 2);
        assert!(caps.contains("llm:vllm"));
    }

    #[test]
    fn parses_comma_separated_caps() {
        let caps = parse_worker_caps(Some("llm:vllm, repo_tools"));
        assert_eq!(caps.len(), 2);
    }

    #[test]
    fn absent_header_is_empty() {
        assert!(parse_worker_caps(None).is_empty());
    }

    #[test]
    fn no_requires_matches_any_worker() {
        assert!(job_matches_worker(None, &HashSet::new()));
    }

    #[test]
    fn empty_caps_array_matches_any_worker() {
        assert!(job_matches_worker(Some(r#"{"caps":[]}"#), &HashSet::new()));
    }

    #[test]
    fn subset_required_is_claimable() {
        let mut offered = HashSet::new();
        offered.insert("llm:vllm".to_string());
        offered.insert("repo_tools".to_string());
        assert!(job_matches_worker(Some(r#"{"caps":["llm:vllm"]}"#), &offered));
    }

    #[test]
    fn missing_capability_is_not_claimable() {
        let offered: HashSet<String> = HashSet::new();
        assert!(!job_matches_worker(Some(r#"{"caps":["llm:vllm"]}"#), &offered));
    }

    #[test]
    fn invalid_json_matches_any_worker() {
        assert!(job_matches_worker(Some("not json"), &HashSet::new()));
    }
}
