// Task records: what to submit, for which account, and when
pub mod loader;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::execution::keys::Keypair;
use crate::scheduler::unlock::UnlockTime;

pub use loader::{load_tasks, resolve_tasks, TaskFile};

/// What a task submits at its unlock time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    /// Pay `amount` to `destination`
    Payment,
    /// Claim one (`claimId`) or all claimable balances, optionally forwarding
    /// `amount` to `destination` in the same transaction
    Claim,
    /// Send everything above `reserve` to `destination`
    Sweep,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Payment => "payment",
            TaskAction::Claim => "claim",
            TaskAction::Sweep => "sweep",
        }
    }
}

/// Account that pays the network fee through a fee bump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePayer {
    pub public_key: String,
    pub secret_key: String,
}

/// Fee strategy as data: per-operation base fee times a multiplier, capped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStrategy {
    /// Fixed base fee; when absent the network's last ledger base fee is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_stroops: Option<u32>,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_stroops: Option<u32>,
}

impl Default for FeeStrategy {
    fn default() -> Self {
        Self {
            base_fee_stroops: None,
            multiplier: default_multiplier(),
            max_fee_stroops: None,
        }
    }
}

impl FeeStrategy {
    /// Per-operation fee given the network base fee
    pub fn per_operation_fee(&self, network_base_fee: u32) -> u32 {
        let base = self.base_fee_stroops.unwrap_or(network_base_fee);
        let fee = base.saturating_mul(self.multiplier.max(1));
        match self.max_fee_stroops {
            Some(cap) => fee.min(cap),
            None => fee,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_multiplier() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_enabled() -> bool {
    true
}

/// One managed account, as written in the tasks file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AccountTask {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    pub public_key: String,
    /// Literal `S…` seed or `env:VAR_NAME`
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<TaskAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    pub unlock_time: UnlockTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_payer: Option<FeePayer>,
    #[serde(default)]
    pub fee: FeeStrategy,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Text memo, at most 28 bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AccountTask {
    /// Claims when a balance id is given, pays otherwise
    pub fn effective_action(&self) -> TaskAction {
        match (self.action, &self.claim_id) {
            (Some(action), _) => action,
            (None, Some(_)) => TaskAction::Claim,
            (None, None) => TaskAction::Payment,
        }
    }
}

/// A validated task with keys decoded and amounts in stroops
#[derive(Debug, Clone)]
pub struct ResolvedTask {
    pub spec: AccountTask,
    pub action: TaskAction,
    pub source: Keypair,
    pub fee_payer: Option<Keypair>,
    pub destination: Option<[u8; 32]>,
    pub amount: Option<i64>,
    pub reserve: i64,
    pub claim_id: Option<[u8; 32]>,
}

impl ResolvedTask {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn account_id(&self) -> &str {
        &self.spec.public_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_action() {
        let mut task: AccountTask = serde_json::from_value(serde_json::json!({
            "name": "a",
            "publicKey": "G",
            "secretKey": "S",
            "unlockTime": "10:00:00"
        }))
        .unwrap();
        assert_eq!(task.effective_action(), TaskAction::Payment);
        assert!(task.enabled);
        assert_eq!(task.retry, RetryConfig::default());

        task.claim_id = Some("00".repeat(36));
        assert_eq!(task.effective_action(), TaskAction::Claim);

        task.action = Some(TaskAction::Sweep);
        assert_eq!(task.effective_action(), TaskAction::Sweep);
    }

    #[test]
    fn test_per_operation_fee() {
        let network = FeeStrategy::default();
        assert_eq!(network.per_operation_fee(100), 100);

        let boosted = FeeStrategy {
            base_fee_stroops: None,
            multiplier: 5,
            max_fee_stroops: Some(300),
        };
        assert_eq!(boosted.per_operation_fee(100), 300);

        let fixed = FeeStrategy {
            base_fee_stroops: Some(1_000),
            multiplier: 2,
            max_fee_stroops: None,
        };
        assert_eq!(fixed.per_operation_fee(100), 2_000);
    }
}
