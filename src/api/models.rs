use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::unlock::UnlockTime;
use crate::tasks::loader::redact_secret;
use crate::tasks::{AccountTask, FeeStrategy, RetryConfig, TaskAction};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub tasks: usize,
    pub failed: usize,
    pub uptime_secs: i64,
}

/// Body of `PUT /tasks/:name/enabled`
#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

/// A configured task as shown to operators: secrets never leave the process
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub name: String,
    pub public_key: String,
    pub secret_key: String,
    pub action: TaskAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    pub unlock_time: UnlockTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_payer: Option<String>,
    pub fee: FeeStrategy,
    pub retry: RetryConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub enabled: bool,
}

impl From<&AccountTask> for TaskView {
    fn from(task: &AccountTask) -> Self {
        Self {
            name: task.name.clone(),
            public_key: task.public_key.clone(),
            secret_key: redact_secret(&task.secret_key),
            action: task.effective_action(),
            destination: task.destination.clone(),
            amount: task.amount.clone(),
            unlock_time: task.unlock_time,
            claim_id: task.claim_id.clone(),
            reserve: task.reserve.clone(),
            fee_payer: task.fee_payer.as_ref().map(|payer| payer.public_key.clone()),
            fee: task.fee.clone(),
            retry: task.retry.clone(),
            memo: task.memo.clone(),
            enabled: task.enabled,
        }
    }
}
