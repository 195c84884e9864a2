use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AppResult, ExecutionError, LedgerError, ResultCodes};
use crate::execution::builder::{
    self, format_balance_id, parse_balance_id, PlannedOp, SignedTransaction, TxOptions,
    MAX_OPERATIONS,
};
use crate::ledger::models::{format_stroops, AccountInfo, TxStatus};
use crate::ledger::LedgerClient;
use crate::tasks::{ResolvedTask, TaskAction};

/// Settings shared by every task
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub network_passphrase: String,
    pub tx_timeout_secs: u64,
}

/// A signed transaction plus what it was built from
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub signed: SignedTransaction,
    /// Claimable balances the transaction claims, Horizon formatted
    pub claim_ids: Vec<String>,
    pub per_operation_fee: u32,
    pub operation_count: usize,
    pub built_at: DateTime<Utc>,
}

impl PreparedTransaction {
    pub fn hash(&self) -> &str {
        &self.signed.hash
    }

    pub fn source_sequence(&self) -> i64 {
        self.signed.source_sequence
    }
}

/// What the ledger says about earlier attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// One of our transactions made it in
    Applied(String),
    /// One of our transactions made it into a ledger but failed there
    FailedOnLedger { hash: String, codes: ResultCodes },
    /// Nothing applied and the inputs are still valid
    NotApplied,
    /// Nothing applied and some of the claimed balances are gone: rebuild
    BalancesChanged,
    /// Nothing applied and none of the claimed balances exist any more
    BalanceGone,
}

/// Builds, signs and submits transactions for tasks
pub struct TaskExecutor {
    ledger: Arc<dyn LedgerClient>,
    settings: ExecutorSettings,
}

impl TaskExecutor {
    pub fn new(ledger: Arc<dyn LedgerClient>, settings: ExecutorSettings) -> Self {
        Self { ledger, settings }
    }

    /// Load fresh account state and build a signed transaction for `task`
    pub async fn prepare(&self, task: &ResolvedTask) -> AppResult<PreparedTransaction> {
        let account = self.ledger.load_account(task.account_id()).await?;

        let network_base_fee = match task.spec.fee.base_fee_stroops {
            Some(fixed) => fixed,
            None => self.ledger.fetch_base_fee().await?,
        };
        let per_operation_fee = task.spec.fee.per_operation_fee(network_base_fee);

        let claim_ids = match task.action {
            TaskAction::Claim => self.claim_targets(task).await?,
            _ => Vec::new(),
        };

        let ops = plan_operations(task, &account, &claim_ids, per_operation_fee)?;

        let built_at = Utc::now();
        let options = TxOptions {
            network_passphrase: self.settings.network_passphrase.clone(),
            per_operation_fee,
            max_time: (built_at.timestamp().max(0) as u64) + self.settings.tx_timeout_secs,
            memo: task.spec.memo.clone(),
        };

        let signed = builder::build_signed(
            &task.source,
            account.sequence,
            &ops,
            &options,
            task.fee_payer.as_ref(),
        )?;

        info!(
            "🖊️  [{}] Prepared {} ({} op(s), fee {}/op, sequence {}{})",
            task.name(),
            signed.hash,
            ops.len(),
            per_operation_fee,
            account.sequence + 1,
            if signed.fee_bumped { ", fee bump" } else { "" }
        );

        Ok(PreparedTransaction {
            signed,
            claim_ids,
            per_operation_fee,
            operation_count: ops.len(),
            built_at,
        })
    }

    async fn claim_targets(&self, task: &ResolvedTask) -> AppResult<Vec<String>> {
        if let Some(id) = &task.claim_id {
            return Ok(vec![format_balance_id(id)]);
        }

        // leave room for the forwarding payment
        let limit = if task.amount.is_some() {
            MAX_OPERATIONS - 1
        } else {
            MAX_OPERATIONS
        };

        let balances = self.ledger.claimable_balances(task.account_id()).await?;
        if balances.len() > limit {
            warn!(
                "⚠️  [{}] {} claimable balances found, claiming the first {}",
                task.name(),
                balances.len(),
                limit
            );
        }

        let ids: Vec<String> = balances.into_iter().take(limit).map(|b| b.id).collect();
        if ids.is_empty() {
            return Err(ExecutionError::NothingToClaim(task.account_id().to_string()).into());
        }
        Ok(ids)
    }

    pub async fn submit(&self, prepared: &PreparedTransaction) -> Result<String, LedgerError> {
        let hash = self.ledger.submit(&prepared.signed.envelope_xdr).await?;
        if hash != prepared.signed.hash {
            warn!(
                "⚠️  Ledger reported hash {} for transaction {}",
                hash, prepared.signed.hash
            );
        }
        Ok(hash)
    }

    /// Check whether any earlier attempt landed and whether the claimed
    /// balances are still there.
    pub async fn reconcile(
        &self,
        hashes: &[String],
        claim_ids: &[String],
    ) -> Result<Reconciliation, LedgerError> {
        let mut failed = None;
        for hash in hashes {
            match self.ledger.transaction_status(hash).await? {
                TxStatus::Applied => {
                    debug!("Transaction {} found on ledger", hash);
                    return Ok(Reconciliation::Applied(hash.clone()));
                }
                TxStatus::Failed(codes) => {
                    debug!("Transaction {} failed on ledger: {}", hash, codes);
                    failed.get_or_insert((hash.clone(), codes));
                }
                TxStatus::Missing => {}
            }
        }

        if let Some((hash, codes)) = failed {
            return Ok(Reconciliation::FailedOnLedger { hash, codes });
        }

        if claim_ids.is_empty() {
            return Ok(Reconciliation::NotApplied);
        }

        let mut gone = 0;
        for id in claim_ids {
            if !self.ledger.claimable_balance_exists(id).await? {
                gone += 1;
            }
        }

        Ok(match gone {
            0 => Reconciliation::NotApplied,
            n if n == claim_ids.len() => Reconciliation::BalanceGone,
            _ => Reconciliation::BalancesChanged,
        })
    }
}

/// Operations for one cycle of `task`, given current account state
fn plan_operations(
    task: &ResolvedTask,
    account: &AccountInfo,
    claim_ids: &[String],
    per_operation_fee: u32,
) -> Result<Vec<PlannedOp>, ExecutionError> {
    let missing = |field: &str| ExecutionError::InvalidKey(format!("{} missing", field));

    match task.action {
        TaskAction::Payment => {
            let destination = task.destination.ok_or_else(|| missing("destination"))?;
            let amount = task
                .amount
                .ok_or_else(|| ExecutionError::InvalidAmount("missing".to_string()))?;
            Ok(vec![PlannedOp::Payment {
                destination,
                amount,
            }])
        }
        TaskAction::Claim => {
            let mut ops = claim_ids
                .iter()
                .map(|id| {
                    parse_balance_id(id).map(|balance_id| PlannedOp::Claim { balance_id })
                })
                .collect::<Result<Vec<_>, _>>()?;

            if let Some(amount) = task.amount {
                let destination = task.destination.ok_or_else(|| missing("destination"))?;
                ops.push(PlannedOp::Payment {
                    destination,
                    amount,
                });
            }
            Ok(ops)
        }
        TaskAction::Sweep => {
            let destination = task.destination.ok_or_else(|| missing("destination"))?;
            // a fee payer covers the fee, otherwise it comes out of the balance
            let fee = if task.fee_payer.is_some() {
                0
            } else {
                per_operation_fee as i64
            };
            let amount = account.native_balance - task.reserve - fee;
            if amount <= 0 {
                return Err(ExecutionError::NothingToSweep {
                    balance: format_stroops(account.native_balance),
                    reserve: format_stroops(task.reserve),
                });
            }
            Ok(vec![PlannedOp::Payment {
                destination,
                amount,
            }])
        }
    }
}
