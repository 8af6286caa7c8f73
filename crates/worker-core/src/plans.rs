//! Plan/approval scaffolds. Both commands are no-op placeholders for a
//! future approval workflow: `plan_echo` stores a plan object keyed by a
//! fresh id, `approve_echo` looks it up and reports it approved without
//! applying anything.

use serde::Serialize;

use crate::error::WorkerError;

#[derive(Debug, Serialize)]
struct Plan {
    #[serde(rename = "type")]
    kind: &'static str,
    plan_id: String,
    summary: String,
    proposed_actions: Vec<&'static str>,
    requires_approval: bool,
}

#[derive(Debug, Serialize)]
struct Approval {
    #[serde(rename = "type")]
    kind: &'static str,
    plan_id: String,
    status: &'static str,
    applied: bool,
    note: &'static str,
}

pub async fn plan_echo(plans_dir: &str, text: &str) -> Result<String, WorkerError> {
    tokio::fs::create_dir_all(plans_dir).await.map_err(WorkerError::Io)?;
    let plan_id = uuid::Uuid::new_v4().to_string();
    let summary = if text.is_empty() {
        "Echo plan (no payload)".to_string()
    } else {
        let clipped: String = text.chars().take(200).collect();
        format!("Echo plan for: {clipped}")
    };
    let plan = Plan {
        kind: "plan",
        plan_id: plan_id.clone(),
        summary,
        proposed_actions: vec!["(no-op)"],
        requires_approval: true,
    };
    let json = serde_json::to_string(&plan).expect("plan serialization cannot fail");
    let path = format!("{plans_dir}/{plan_id}.json");
    tokio::fs::write(&path, serde_json::to_vec_pretty(&plan).unwrap())
        .await
        .map_err(WorkerError::Io)?;
    Ok(json)
}

pub async fn approve_echo(plans_dir: &str, plan_id: &str) -> Result<String, WorkerError> {
    let path = format!("{plans_dir}/{plan_id}.json");
    if tokio::fs::metadata(&path).await.is_err() {
        return Err(WorkerError::UnknownPlanId);
    }
    let approval = Approval {
        kind: "approval",
        plan_id: plan_id.to_string(),
        status: "approved",
        applied: false,
        note: "no-op (scaffold)",
    };
    Ok(serde_json::to_string(&approval).expect("approval serialization cannot fail"))
}
