// Shared fixtures for unit tests: a scripted ledger and ready-made tasks

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::error::{LedgerError, ResultCodes};
use crate::execution::builder::{envelope_hash, format_balance_id};
use crate::execution::keys::{encode_account_id, encode_seed, Keypair};
use crate::ledger::models::{AccountInfo, ClaimableBalance, TxStatus, STROOPS_PER_UNIT};
use crate::ledger::LedgerClient;
use crate::tasks::{resolve_tasks, AccountTask, FeeStrategy, ResolvedTask, RetryConfig, TaskAction};

pub const PASSPHRASE: &str = "Pi Network";

/// What the next `submit` call does
#[derive(Debug, Clone)]
pub enum SubmitStep {
    Accept,
    Fail(LedgerError),
    /// The transaction is applied but the caller sees a transport error
    LostResponse,
    /// An earlier copy of the same envelope lands just before this call,
    /// which then fails with the given error
    LandedEarlier(LedgerError),
    /// The transaction makes it into a ledger but fails with this code
    FailsOnLedger(&'static str),
}

pub fn rejected(code: &str) -> LedgerError {
    LedgerError::Rejected {
        status: 400,
        codes: ResultCodes {
            transaction: Some(code.to_string()),
            operations: Vec::new(),
        },
    }
}

fn failed_codes(code: &str) -> ResultCodes {
    ResultCodes {
        transaction: Some("tx_failed".to_string()),
        operations: vec![code.to_string()],
    }
}

pub fn timeout() -> LedgerError {
    LedgerError::Http {
        status: 504,
        body: "Timeout".to_string(),
    }
}

/// In-memory ledger driven by a per-call script
pub struct ScriptedLedger {
    sequence: Mutex<i64>,
    native_balance: Mutex<i64>,
    claimables: Mutex<Vec<String>>,
    script: Mutex<VecDeque<SubmitStep>>,
    /// Used once the script runs out; `None` accepts
    fallback: Mutex<Option<LedgerError>>,
    /// Source accounts whose submissions always fail
    failing_sources: Mutex<HashMap<String, LedgerError>>,
    outcomes: Mutex<HashMap<String, TxStatus>>,
    submitted: Mutex<Vec<String>>,
    submit_delay: Mutex<Duration>,
}

/// Source account of a base64 envelope (the inner source for fee bumps)
fn envelope_source(envelope_xdr: &str) -> Option<String> {
    use base64::Engine;
    use stellar_xdr::curr::{
        FeeBumpTransactionInnerTx, Limits, MuxedAccount, ReadXdr, TransactionEnvelope,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(envelope_xdr)
        .ok()?;
    let source = match TransactionEnvelope::from_xdr(bytes, Limits::none()).ok()? {
        TransactionEnvelope::Tx(v1) => v1.tx.source_account,
        TransactionEnvelope::TxFeeBump(bump) => match bump.tx.inner_tx {
            FeeBumpTransactionInnerTx::Tx(inner) => inner.tx.source_account,
        },
        TransactionEnvelope::TxV0(_) => return None,
    };
    match source {
        MuxedAccount::Ed25519(key) => Some(encode_account_id(&key.0)),
        MuxedAccount::MuxedEd25519(muxed) => Some(encode_account_id(&muxed.ed25519.0)),
    }
}

impl ScriptedLedger {
    pub fn new(sequence: i64) -> Self {
        Self {
            sequence: Mutex::new(sequence),
            native_balance: Mutex::new(100 * STROOPS_PER_UNIT),
            claimables: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            failing_sources: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            submit_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn script(&self, steps: Vec<SubmitStep>) {
        self.script.lock().extend(steps);
    }

    pub fn always_fail(&self, error: LedgerError) {
        *self.fallback.lock() = Some(error);
    }

    pub fn fail_source(&self, account_id: &str, error: LedgerError) {
        self.failing_sources
            .lock()
            .insert(account_id.to_string(), error);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock() = delay;
    }

    pub fn set_sequence(&self, sequence: i64) {
        *self.sequence.lock() = sequence;
    }

    pub fn set_native_balance(&self, units: Decimal) {
        let stroops = (units * Decimal::from(STROOPS_PER_UNIT))
            .to_i64()
            .unwrap_or_default();
        *self.native_balance.lock() = stroops;
    }

    pub fn add_claimable(&self, id: &str) {
        self.claimables.lock().push(id.to_string());
    }

    pub fn remove_claimable(&self, id: &str) {
        self.claimables.lock().retain(|c| c != id);
    }

    pub fn mark_applied(&self, hash: &str) {
        self.outcomes
            .lock()
            .insert(hash.to_string(), TxStatus::Applied);
    }

    pub fn mark_failed(&self, hash: &str, code: &str) {
        self.outcomes
            .lock()
            .insert(hash.to_string(), TxStatus::Failed(failed_codes(code)));
    }

    /// Hashes of every envelope passed to `submit`, in order
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }

    /// Record the outcome and use up the source sequence number
    fn include(&self, hash: &str, status: TxStatus) {
        self.outcomes.lock().insert(hash.to_string(), status);
        *self.sequence.lock() += 1;
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn load_account(&self, account_id: &str) -> Result<AccountInfo, LedgerError> {
        Ok(AccountInfo {
            account_id: account_id.to_string(),
            sequence: *self.sequence.lock(),
            native_balance: *self.native_balance.lock(),
        })
    }

    async fn fetch_base_fee(&self) -> Result<u32, LedgerError> {
        Ok(100)
    }

    async fn claimable_balances(
        &self,
        _claimant: &str,
    ) -> Result<Vec<ClaimableBalance>, LedgerError> {
        Ok(self
            .claimables
            .lock()
            .iter()
            .map(|id| ClaimableBalance {
                id: id.clone(),
                amount: "10.0000000".to_string(),
                asset: "native".to_string(),
            })
            .collect())
    }

    async fn claimable_balance_exists(&self, balance_id: &str) -> Result<bool, LedgerError> {
        Ok(self.claimables.lock().iter().any(|id| id == balance_id))
    }

    async fn submit(&self, envelope_xdr: &str) -> Result<String, LedgerError> {
        let delay = *self.submit_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let hash = envelope_hash(envelope_xdr, PASSPHRASE)
            .map_err(|e| LedgerError::Decode(e.to_string()))?;
        self.submitted.lock().push(hash.clone());

        if let Some(source) = envelope_source(envelope_xdr) {
            if let Some(error) = self.failing_sources.lock().get(&source) {
                return Err(error.clone());
            }
        }

        let step = self.script.lock().pop_front();
        let step = step.unwrap_or_else(|| match self.fallback.lock().clone() {
            Some(error) => SubmitStep::Fail(error),
            None => SubmitStep::Accept,
        });

        match step {
            SubmitStep::Accept => {
                self.include(&hash, TxStatus::Applied);
                Ok(hash)
            }
            SubmitStep::LostResponse => {
                self.include(&hash, TxStatus::Applied);
                Err(LedgerError::Transport("connection reset by peer".to_string()))
            }
            SubmitStep::LandedEarlier(error) => {
                self.include(&hash, TxStatus::Applied);
                Err(error)
            }
            SubmitStep::FailsOnLedger(code) => {
                self.include(&hash, TxStatus::Failed(failed_codes(code)));
                Err(LedgerError::Transport("connection reset by peer".to_string()))
            }
            SubmitStep::Fail(error) => Err(error),
        }
    }

    async fn transaction_status(&self, hash: &str) -> Result<TxStatus, LedgerError> {
        Ok(self
            .outcomes
            .lock()
            .get(hash)
            .cloned()
            .unwrap_or(TxStatus::Missing))
    }
}

pub fn account_keys(byte: u8) -> (String, String) {
    let seed = encode_seed(&[byte; 32]);
    let account = Keypair::from_seed_bytes([byte; 32]).account_id();
    (account, seed)
}

pub fn account_task(name: &str, action: TaskAction) -> AccountTask {
    let (account, seed) = account_keys(1);
    let (destination, _) = account_keys(2);
    AccountTask {
        name: name.to_string(),
        public_key: account,
        secret_key: seed,
        action: Some(action),
        destination: Some(destination),
        amount: Some("1".to_string()),
        unlock_time: "10:00:00.000".parse().unwrap(),
        claim_id: None,
        reserve: None,
        fee_payer: None,
        fee: FeeStrategy::default(),
        retry: RetryConfig {
            max_attempts: 3,
            backoff_ms: 0,
        },
        memo: None,
        enabled: true,
    }
}

pub fn resolve(task: AccountTask) -> ResolvedTask {
    resolve_tasks(&[task]).unwrap().remove(0)
}

pub fn payment_task(name: &str) -> ResolvedTask {
    resolve(account_task(name, TaskAction::Payment))
}

pub fn sweep_task(name: &str) -> ResolvedTask {
    let mut task = account_task(name, TaskAction::Sweep);
    task.amount = None;
    resolve(task)
}

pub fn claim_task(name: &str, balance: Option<[u8; 32]>) -> ResolvedTask {
    let mut task = account_task(name, TaskAction::Claim);
    task.amount = None;
    task.destination = None;
    task.claim_id = balance.map(|id| format_balance_id(&id));
    resolve(task)
}
