use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::info;
use validator::Validate;

use crate::error::ConfigError;
use crate::execution::builder::{parse_balance_id, MAX_MEMO_BYTES};
use crate::execution::keys::{decode_account_id, Keypair};
use crate::ledger::models::parse_stroops;
use crate::tasks::{AccountTask, ResolvedTask, TaskAction};

const ENV_PREFIX: &str = "env:";
const DEFAULT_SWEEP_RESERVE: &str = "1";
const MAX_ATTEMPTS_LIMIT: u32 = 50;

/// Read the ordered task list from a JSON file
pub fn load_tasks(path: impl AsRef<Path>) -> Result<Vec<AccountTask>, ConfigError> {
    let path = path.as_ref();
    let file = path.display().to_string();

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: file.clone(),
        source,
    })?;

    let tasks: Vec<AccountTask> = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: file.clone(),
        source,
    })?;

    info!("📄 Loaded {} task(s) from {}", tasks.len(), file);
    Ok(tasks)
}

/// Write the task list back, pretty printed, in the same order
pub fn save_tasks(path: impl AsRef<Path>, tasks: &[AccountTask]) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let file = path.display().to_string();

    let json = serde_json::to_string_pretty(tasks).map_err(|source| ConfigError::Json {
        path: file.clone(),
        source,
    })?;

    std::fs::write(path, json).map_err(|source| ConfigError::Io { path: file, source })
}

/// The task file as loaded, kept so operator toggles survive a restart
#[derive(Debug)]
pub struct TaskFile {
    path: PathBuf,
    tasks: Mutex<Vec<AccountTask>>,
}

impl TaskFile {
    pub fn new(path: impl Into<PathBuf>, tasks: Vec<AccountTask>) -> Self {
        Self {
            path: path.into(),
            tasks: Mutex::new(tasks),
        }
    }

    /// Rewrite the file with `name`'s enabled flag changed.
    ///
    /// Returns false if no such task is in the file.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool, ConfigError> {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.iter_mut().find(|task| task.name == name) else {
            return Ok(false);
        };
        if task.enabled == enabled {
            return Ok(true);
        }

        task.enabled = enabled;
        save_tasks(&self.path, &tasks)?;
        Ok(true)
    }
}

/// Validate every record and decode keys and amounts.
///
/// Any invalid record rejects the whole list; nothing is skipped.
pub fn resolve_tasks(tasks: &[AccountTask]) -> Result<Vec<ResolvedTask>, ConfigError> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(tasks.len());

    for (index, task) in tasks.iter().enumerate() {
        if !seen.insert(task.name.clone()) {
            return Err(ConfigError::DuplicateTask(task.name.clone()));
        }
        resolved.push(resolve_task(index, task)?);
    }

    Ok(resolved)
}

fn resolve_task(index: usize, task: &AccountTask) -> Result<ResolvedTask, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidTask {
        index,
        name: task.name.clone(),
        message,
    };

    task.validate().map_err(|e| invalid(e.to_string()))?;

    decode_account_id(&task.public_key).map_err(|e| invalid(format!("publicKey: {}", e)))?;
    let source = resolve_keypair(task, &task.secret_key, &task.public_key)
        .map_err(|e| with_index(e, index, "secretKey"))?;

    let fee_payer = match &task.fee_payer {
        Some(payer) => {
            decode_account_id(&payer.public_key)
                .map_err(|e| invalid(format!("feePayer.publicKey: {}", e)))?;
            Some(
                resolve_keypair(task, &payer.secret_key, &payer.public_key)
                    .map_err(|e| with_index(e, index, "feePayer.secretKey"))?,
            )
        }
        None => None,
    };

    let destination = match &task.destination {
        Some(destination) => Some(
            decode_account_id(destination).map_err(|e| invalid(format!("destination: {}", e)))?,
        ),
        None => None,
    };

    let amount = match &task.amount {
        Some(amount) => {
            let stroops = parse_stroops(amount).map_err(|e| invalid(format!("amount: {}", e)))?;
            if stroops <= 0 {
                return Err(invalid(format!("amount must be positive, got {}", amount)));
            }
            Some(stroops)
        }
        None => None,
    };

    let reserve_raw = task.reserve.as_deref().unwrap_or(DEFAULT_SWEEP_RESERVE);
    let reserve = parse_stroops(reserve_raw).map_err(|e| invalid(format!("reserve: {}", e)))?;
    if reserve < 0 {
        return Err(invalid(format!("reserve must not be negative, got {}", reserve_raw)));
    }

    let claim_id = match &task.claim_id {
        Some(id) => Some(parse_balance_id(id).map_err(|e| invalid(format!("claimId: {}", e)))?),
        None => None,
    };

    let action = task.effective_action();
    match action {
        TaskAction::Payment if destination.is_none() || amount.is_none() => {
            return Err(invalid("payment requires destination and amount".to_string()));
        }
        TaskAction::Sweep if destination.is_none() => {
            return Err(invalid("sweep requires destination".to_string()));
        }
        TaskAction::Claim if amount.is_some() && destination.is_none() => {
            return Err(invalid("claim with amount requires destination".to_string()));
        }
        _ => {}
    }

    if task.retry.max_attempts == 0 || task.retry.max_attempts > MAX_ATTEMPTS_LIMIT {
        return Err(invalid(format!(
            "retry.maxAttempts must be within 1..={}, got {}",
            MAX_ATTEMPTS_LIMIT, task.retry.max_attempts
        )));
    }

    if let Some(memo) = &task.memo {
        if memo.len() > MAX_MEMO_BYTES {
            return Err(invalid(format!(
                "memo is {} bytes, at most {} allowed",
                memo.len(),
                MAX_MEMO_BYTES
            )));
        }
    }

    if task.fee.multiplier == 0 {
        return Err(invalid("fee.multiplier must be at least 1".to_string()));
    }

    Ok(ResolvedTask {
        spec: task.clone(),
        action,
        source,
        fee_payer,
        destination,
        amount,
        reserve,
        claim_id,
    })
}

fn with_index(error: ConfigError, index: usize, field: &str) -> ConfigError {
    match error {
        ConfigError::InvalidTask { name, message, .. } => ConfigError::InvalidTask {
            index,
            name,
            message: format!("{}: {}", field, message),
        },
        other => other,
    }
}

/// Resolve a secret reference and check it belongs to `public_key`
fn resolve_keypair(
    task: &AccountTask,
    secret_ref: &str,
    public_key: &str,
) -> Result<Keypair, ConfigError> {
    let secret = match secret_ref.strip_prefix(ENV_PREFIX) {
        Some(var) => std::env::var(var).map_err(|_| ConfigError::MissingSecret {
            task: task.name.clone(),
            var: var.to_string(),
        })?,
        None => secret_ref.to_string(),
    };

    let keypair = Keypair::from_secret(secret.trim()).map_err(|e| ConfigError::InvalidTask {
        index: 0,
        name: task.name.clone(),
        message: e.to_string(),
    })?;

    if keypair.account_id() != public_key {
        return Err(ConfigError::InvalidTask {
            index: 0,
            name: task.name.clone(),
            message: format!("does not match {}", public_key),
        });
    }

    Ok(keypair)
}

/// Secret references shown to operators: env references stay, seeds are masked
pub fn redact_secret(secret_ref: &str) -> String {
    if secret_ref.starts_with(ENV_PREFIX) {
        secret_ref.to_string()
    } else {
        "S****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::keys::encode_seed;
    use crate::scheduler::unlock::UnlockTime;
    use crate::tasks::{FeePayer, FeeStrategy, RetryConfig};

    fn keys(byte: u8) -> (String, String) {
        let seed = encode_seed(&[byte; 32]);
        let account = Keypair::from_secret(&seed).unwrap().account_id();
        (account, seed)
    }

    fn payment_task(name: &str) -> AccountTask {
        let (account, seed) = keys(1);
        let (destination, _) = keys(2);
        AccountTask {
            name: name.to_string(),
            public_key: account,
            secret_key: seed,
            action: None,
            destination: Some(destination),
            amount: Some("12.5".to_string()),
            unlock_time: "10:00:00.000".parse().unwrap(),
            claim_id: None,
            reserve: None,
            fee_payer: None,
            fee: FeeStrategy::default(),
            retry: RetryConfig::default(),
            memo: None,
            enabled: true,
        }
    }

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tasks-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let (payer_account, payer_seed) = keys(3);
        let mut claim = payment_task("claimer");
        claim.action = Some(TaskAction::Claim);
        claim.claim_id = Some(format!("00000000{}", "ab".repeat(32)));
        claim.unlock_time = UnlockTime::new(23, 59, 59, 900).unwrap();
        claim.fee_payer = Some(FeePayer {
            public_key: payer_account,
            secret_key: payer_seed,
        });
        claim.fee = FeeStrategy {
            base_fee_stroops: Some(1_000),
            multiplier: 3,
            max_fee_stroops: Some(10_000),
        };
        claim.retry = RetryConfig {
            max_attempts: 7,
            backoff_ms: 0,
        };
        claim.memo = Some("unlock".to_string());
        claim.enabled = false;

        let tasks = vec![payment_task("payer"), claim];
        let path = temp_path();

        save_tasks(&path, &tasks).unwrap();
        let loaded = load_tasks(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, tasks);
    }

    #[test]
    fn test_task_file_persists_toggle() {
        let path = temp_path();
        let tasks = vec![payment_task("a"), payment_task("b")];
        save_tasks(&path, &tasks).unwrap();

        let file = TaskFile::new(&path, tasks);
        assert!(file.set_enabled("b", false).unwrap());
        assert!(!file.set_enabled("ghost", false).unwrap());

        let loaded = load_tasks(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(loaded[0].enabled);
        assert!(!loaded[1].enabled);
    }

    #[test]
    fn test_resolve_valid_task() {
        let resolved = resolve_tasks(&[payment_task("a")]).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].action, TaskAction::Payment);
        assert_eq!(resolved[0].amount, Some(125_000_000));
        assert_eq!(resolved[0].reserve, 10_000_000);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = resolve_tasks(&[payment_task("a"), payment_task("a")]);
        assert!(matches!(result, Err(ConfigError::DuplicateTask(name)) if name == "a"));
    }

    #[test]
    fn test_invalid_records_name_the_task() {
        let mut missing_amount = payment_task("no-amount");
        missing_amount.amount = None;
        let err = resolve_tasks(&[payment_task("ok"), missing_amount]).unwrap_err();
        match err {
            ConfigError::InvalidTask { index, name, .. } => {
                assert_eq!(index, 1);
                assert_eq!(name, "no-amount");
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut bad_destination = payment_task("bad-dest");
        bad_destination.destination = Some("GNOTAKEY".to_string());
        assert!(resolve_tasks(&[bad_destination]).is_err());

        let mut zero_attempts = payment_task("zero");
        zero_attempts.retry.max_attempts = 0;
        assert!(resolve_tasks(&[zero_attempts]).is_err());

        let mut negative = payment_task("negative");
        negative.amount = Some("-1".to_string());
        assert!(resolve_tasks(&[negative]).is_err());
    }

    #[test]
    fn test_memo_limit_counts_bytes() {
        let mut ascii = payment_task("ascii");
        ascii.memo = Some("x".repeat(28));
        assert!(resolve_tasks(&[ascii]).is_ok());

        // 20 characters, 40 bytes
        let mut accented = payment_task("accented");
        accented.memo = Some("é".repeat(20));
        let err = resolve_tasks(&[accented]).unwrap_err();
        assert!(err.to_string().contains("memo is 40 bytes"));
    }

    #[test]
    fn test_non_ascii_secret_is_a_config_error() {
        let mut task = payment_task("accent");
        task.secret_key = "Sabcé".to_string();
        let err = resolve_tasks(&[task]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTask { .. }));
        assert!(err.to_string().contains("secretKey"));
    }

    #[test]
    fn test_secret_must_match_public_key() {
        let mut task = payment_task("mismatch");
        task.secret_key = keys(9).1;
        let err = resolve_tasks(&[task]).unwrap_err();
        assert!(err.to_string().contains("secretKey"));
    }

    #[test]
    fn test_env_secret_reference() {
        let mut task = payment_task("from-env");
        let var = format!("UNLOCK_BOT_TEST_SECRET_{}", uuid::Uuid::new_v4().simple());
        std::env::set_var(&var, keys(1).1);
        task.secret_key = format!("env:{}", var);
        assert!(resolve_tasks(&[task.clone()]).is_ok());

        std::env::remove_var(&var);
        let err = resolve_tasks(&[task]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret { .. }));
    }

    #[test]
    fn test_redact_secret() {
        assert_eq!(redact_secret("env:BOT_SECRET"), "env:BOT_SECRET");
        assert_eq!(redact_secret(&keys(1).1), "S****");
    }
}
