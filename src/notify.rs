// Notification System
//
// Email via Resend, sent when a cycle ends: on success and on a final failure.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::execution::retry::{SubmissionOutcome, SubmissionResult};
use crate::tasks::TaskAction;

const RESEND_URL: &str = "https://api.resend.com/emails";

/// Resend email client
pub struct Notifier {
    api_key: String,
    from_email: String,
    to_email: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ResendEmailRequest {
    to: String,
    from: String,
    subject: String,
    html: String,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    id: String,
}

/// Subject and HTML body for a finished cycle
pub fn render(task: &str, action: TaskAction, outcome: &SubmissionOutcome) -> (String, String) {
    match &outcome.result {
        SubmissionResult::Succeeded { hash } => (
            format!("✅ {} {} succeeded", task, action.as_str()),
            format!(
                "<p><b>{}</b> submitted after {} attempt(s).</p><p>TX: <code>{}</code></p>",
                task, outcome.attempts, hash
            ),
        ),
        SubmissionResult::Failed { reason, class } => (
            format!("❌ {} {} failed", task, action.as_str()),
            format!(
                "<p><b>{}</b> gave up after {} attempt(s) ({:?}).</p><p>{}</p>",
                task, outcome.attempts, class, reason
            ),
        ),
    }
}

impl Notifier {
    pub fn new(api_key: String, from_email: String, to_email: String) -> Self {
        Self {
            api_key,
            from_email,
            to_email,
            client: reqwest::Client::new(),
        }
    }

    /// Send email via Resend
    pub async fn send_email(&self, subject: &str, html_body: &str) -> AppResult<String> {
        let request = ResendEmailRequest {
            to: self.to_email.clone(),
            from: self.from_email.clone(),
            subject: subject.to_string(),
            html: html_body.to_string(),
        };

        let response = self
            .client
            .post(RESEND_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Resend request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!("Resend API error: {}", error_text)));
        }

        let result: ResendEmailResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Resend response: {}", e)))?;
        info!("📧 Email sent via Resend: {}", result.id);
        Ok(result.id)
    }

    /// Best effort: a failed notification never affects the task
    pub async fn cycle_finished(&self, task: &str, action: TaskAction, outcome: &SubmissionOutcome) {
        let (subject, body) = render(task, action, outcome);
        if let Err(e) = self.send_email(&subject, &body).await {
            warn!("⚠️  [{}] Notification not sent: {}", task, e);
        }
    }
}
