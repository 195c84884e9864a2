use chrono::FixedOffset;
use serde::Deserialize;

use crate::error::ConfigError;

/// Service settings, read from the process environment (and `.env`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub port: u16,
    pub horizon_url: String,
    pub network_passphrase: String,
    pub tasks_file: String,
    /// Offset of the zone `unlockTime` values are written in
    pub utc_offset_minutes: i32,
    /// Half-width of the submission window
    pub tolerance_ms: u64,
    /// How long before the unlock the transaction is built and signed
    pub prepare_lead_ms: u64,
    pub tx_timeout_secs: u64,
    pub request_timeout_ms: u64,
    pub stream_sequences: bool,
    pub success_log: String,
    pub failure_log: String,
    pub resend_api_key: Option<String>,
    pub notify_email_from: Option<String>,
    pub notify_email_to: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("port", 3000)?
            .set_default("horizon_url", "https://api.mainnet.minepi.com")?
            .set_default("network_passphrase", "Pi Network")?
            .set_default("tasks_file", "bot.json")?
            .set_default("utc_offset_minutes", 60)?
            .set_default("tolerance_ms", 200)?
            .set_default("prepare_lead_ms", 10_000)?
            .set_default("tx_timeout_secs", 60)?
            .set_default("request_timeout_ms", 15_000)?
            .set_default("stream_sequences", false)?
            .set_default("success_log", "success.log")?
            .set_default("failure_log", "fail.log")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Zone the task unlock times are written in
    pub fn zone(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::InvalidSetting {
                name: "UTC_OFFSET_MINUTES",
                message: format!("{} is out of range", self.utc_offset_minutes),
            })
    }

    /// Email notifications need all three settings
    pub fn email_settings(&self) -> Option<(String, String, String)> {
        match (
            &self.resend_api_key,
            &self.notify_email_from,
            &self.notify_email_to,
        ) {
            (Some(key), Some(from), Some(to)) => Some((key.clone(), from.clone(), to.clone())),
            _ => None,
        }
    }
}
