// Append-only audit trail: one line per finished cycle in success.log / fail.log

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::error;

use crate::tasks::TaskAction;

#[derive(Debug, Clone)]
pub struct AuditLog {
    success_path: PathBuf,
    failure_path: PathBuf,
}

fn past_tense(action: TaskAction) -> &'static str {
    match action {
        TaskAction::Payment => "Paid",
        TaskAction::Claim => "Claimed",
        TaskAction::Sweep => "Swept",
    }
}

pub fn success_line(
    at: DateTime<Utc>,
    task: &str,
    action: TaskAction,
    detail: &str,
    hash: &str,
) -> String {
    format!(
        "[{}] ✅ [{}] {} {} | TX: {}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        task,
        past_tense(action),
        detail,
        hash
    )
}

pub fn failure_line(at: DateTime<Utc>, task: &str, action: TaskAction, reason: &str) -> String {
    format!(
        "[{}] ❌ [{}] {} failed: {}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        task,
        action.as_str(),
        reason
    )
}

impl AuditLog {
    pub fn new(success_path: impl Into<PathBuf>, failure_path: impl Into<PathBuf>) -> Self {
        Self {
            success_path: success_path.into(),
            failure_path: failure_path.into(),
        }
    }

    pub async fn success(&self, task: &str, action: TaskAction, detail: &str, hash: &str) {
        let line = success_line(Utc::now(), task, action, detail, hash);
        self.append(&self.success_path, &line).await;
    }

    pub async fn failure(&self, task: &str, action: TaskAction, reason: &str) {
        let line = failure_line(Utc::now(), task, action, reason);
        self.append(&self.failure_path, &line).await;
    }

    /// Audit failures are logged, never propagated
    async fn append(&self, path: &Path, line: &str) {
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            error!("❌ Failed to append to {}: {}", path.display(), e);
        }
    }
}
