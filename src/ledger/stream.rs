// Horizon account stream (server-sent events)
//
// Horizon pushes the full account document whenever it changes. Only the
// sequence number is of interest here; it lets a runner notice that a
// prepared transaction was built on a sequence that has since moved.

use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Extract the account sequence from one SSE line, if it carries one
pub fn parse_sse_sequence(line: &str) -> Option<i64> {
    let data = line.strip_prefix("data:")?.trim();
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    value.get("sequence")?.as_str()?.parse().ok()
}

/// Splits a byte stream into complete lines, keeping partial tails
#[derive(Debug, Default)]
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }
}

pub struct AccountStream {
    url: String,
    account_id: String,
    client: reqwest::Client,
}

impl AccountStream {
    pub fn new(horizon_url: &str, account_id: &str) -> Self {
        Self {
            url: format!(
                "{}/accounts/{}",
                horizon_url.trim_end_matches('/'),
                account_id
            ),
            account_id: account_id.to_string(),
            // no request timeout: the connection is meant to stay open
            client: reqwest::Client::new(),
        }
    }

    /// Stream sequence updates into `on_sequence` forever, reconnecting
    /// with exponential backoff whenever the connection drops.
    pub async fn run<F>(self, on_sequence: F)
    where
        F: Fn(i64) + Send + Sync,
    {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match self.consume(&on_sequence).await {
                Ok(()) => {
                    info!("📡 Account stream for {} closed, reconnecting", self.account_id);
                    backoff = INITIAL_BACKOFF;
                }
                Err(e) => {
                    warn!(
                        "⚠️  Account stream for {} failed: {} (retrying in {:?})",
                        self.account_id, e, backoff
                    );
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn consume<F>(&self, on_sequence: &F) -> Result<(), reqwest::Error>
    where
        F: Fn(i64) + Send + Sync,
    {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        info!("📡 Streaming account {}", self.account_id);

        let mut bytes = response.bytes_stream();
        let mut buffer = LineBuffer::default();

        while let Some(chunk) = bytes.next().await {
            for line in buffer.push(&chunk?) {
                if let Some(sequence) = parse_sse_sequence(&line) {
                    debug!("Streamed sequence {} for {}", sequence, self.account_id);
                    on_sequence(sequence);
                }
            }
        }

        Ok(())
    }
}
