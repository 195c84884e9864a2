// Submission retry loop
//
// One bounded loop per cycle. Every submit is an attempt; a rebuild that
// fails also consumes one. After every failed submit the ledger is asked
// whether one of our transactions already landed, so a response lost in
// transit is never paid twice.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::error::FailureClass;
use crate::execution::executor::{PreparedTransaction, Reconciliation, TaskExecutor};
use crate::tasks::{ResolvedTask, RetryConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmissionResult {
    Succeeded { hash: String },
    Failed { reason: String, class: FailureClass },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub result: SubmissionResult,
    pub attempts: u32,
    pub refreshes: u32,
    /// Every transaction hash submitted during the sequence
    pub hashes: Vec<String>,
}

impl SubmissionOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.result, SubmissionResult::Succeeded { .. })
    }
}

/// Progress notifications for the status board
#[derive(Debug, Clone)]
pub enum RetryEvent<'a> {
    Attempt { number: u32, hash: &'a str },
    Refreshed { refreshes: u32 },
    AttemptFailed { number: u32, error: &'a str },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Where the submission sequence is
#[derive(Debug)]
enum Phase {
    /// Build from fresh ledger state
    Build,
    Submit(PreparedTransaction),
    /// A submit failed: find out what the ledger did with it
    Reconcile {
        prepared: PreparedTransaction,
        class: FailureClass,
    },
    /// Wait, then send the same envelope again
    Backoff(PreparedTransaction),
    Succeeded(String),
    Failed,
}

impl RetryPolicy {
    /// Submit `initial` (or a freshly built transaction) until it succeeds,
    /// fails permanently or runs out of attempts.
    #[instrument(skip_all, fields(task = %task.name(), max_attempts = self.max_attempts))]
    pub async fn run<F>(
        &self,
        executor: &TaskExecutor,
        task: &ResolvedTask,
        initial: Option<PreparedTransaction>,
        mut on_event: F,
    ) -> SubmissionOutcome
    where
        F: FnMut(RetryEvent<'_>),
    {
        let mut attempts = 0;
        let mut refreshes = 0;
        let mut hashes: Vec<String> = Vec::new();
        let mut last_failure = ("no attempt made".to_string(), FailureClass::Permanent);

        let mut phase = match initial {
            Some(prepared) => Phase::Submit(prepared),
            None => Phase::Build,
        };

        let result = loop {
            debug!(?phase, attempts);
            phase = match phase {
                Phase::Build | Phase::Submit(_) if attempts >= self.max_attempts => Phase::Failed,

                Phase::Build => match executor.prepare(task).await {
                    Ok(prepared) => Phase::Submit(prepared),
                    Err(e) => {
                        attempts += 1;
                        let message = e.to_string();
                        warn!(
                            "⚠️  [{}] Attempt {}/{} could not build: {}",
                            task.name(),
                            attempts,
                            self.max_attempts,
                            message
                        );
                        on_event(RetryEvent::AttemptFailed {
                            number: attempts,
                            error: &message,
                        });
                        last_failure = (message, e.failure_class());

                        if last_failure.1 == FailureClass::Permanent {
                            Phase::Failed
                        } else {
                            self.pause(attempts).await;
                            Phase::Build
                        }
                    }
                },

                Phase::Submit(prepared) => {
                    attempts += 1;
                    if !hashes.iter().any(|h| h == prepared.hash()) {
                        hashes.push(prepared.hash().to_string());
                    }
                    on_event(RetryEvent::Attempt {
                        number: attempts,
                        hash: prepared.hash(),
                    });
                    info!(
                        "🚀 [{}] Attempt {}/{} submitting {}",
                        task.name(),
                        attempts,
                        self.max_attempts,
                        prepared.hash()
                    );

                    match executor.submit(&prepared).await {
                        Ok(hash) => {
                            info!("✅ [{}] Transaction applied: {}", task.name(), hash);
                            Phase::Succeeded(hash)
                        }
                        Err(error) => {
                            let class = error.class();
                            let message = error.to_string();
                            warn!(
                                "⚠️  [{}] Attempt {}/{} failed ({:?}): {}",
                                task.name(),
                                attempts,
                                self.max_attempts,
                                class,
                                message
                            );
                            on_event(RetryEvent::AttemptFailed {
                                number: attempts,
                                error: &message,
                            });
                            last_failure = (message, class);
                            Phase::Reconcile { prepared, class }
                        }
                    }
                }

                // Runs after every failed submit, the last one included: a
                // resubmitted envelope can be rejected because its own
                // earlier copy already landed.
                Phase::Reconcile { prepared, class } => {
                    match executor.reconcile(&hashes, &prepared.claim_ids).await {
                        Ok(Reconciliation::Applied(hash)) => {
                            info!(
                                "✅ [{}] Earlier transaction {} was applied",
                                task.name(),
                                hash
                            );
                            Phase::Succeeded(hash)
                        }
                        Ok(Reconciliation::FailedOnLedger { hash, codes }) => {
                            last_failure = (
                                format!("transaction {} failed on ledger: {}", hash, codes),
                                FailureClass::Permanent,
                            );
                            Phase::Failed
                        }
                        Ok(Reconciliation::BalanceGone) => {
                            last_failure = (
                                "balance no longer claimable".to_string(),
                                FailureClass::Permanent,
                            );
                            Phase::Failed
                        }
                        Ok(Reconciliation::BalancesChanged) if class != FailureClass::Permanent => {
                            self.refresh(&mut refreshes, &mut on_event)
                        }
                        other => {
                            if let Err(e) = other {
                                warn!("⚠️  [{}] Could not reconcile: {}", task.name(), e);
                            }
                            match class {
                                FailureClass::StaleState => {
                                    self.refresh(&mut refreshes, &mut on_event)
                                }
                                FailureClass::Transient => Phase::Backoff(prepared),
                                FailureClass::Permanent => Phase::Failed,
                            }
                        }
                    }
                }

                Phase::Backoff(prepared) => {
                    self.pause(attempts).await;
                    Phase::Submit(prepared)
                }

                Phase::Succeeded(hash) => break SubmissionResult::Succeeded { hash },

                Phase::Failed => {
                    let (reason, class) = last_failure.clone();
                    error!(
                        "❌ [{}] Giving up after {} attempt(s): {}",
                        task.name(),
                        attempts,
                        reason
                    );
                    break SubmissionResult::Failed { reason, class };
                }
            };
        };

        SubmissionOutcome {
            result,
            attempts,
            refreshes,
            hashes,
        }
    }

    /// Back off unless the attempts are used up
    async fn pause(&self, attempts: u32) {
        if attempts < self.max_attempts {
            tokio::time::sleep(self.backoff).await;
        }
    }

    fn refresh<F>(&self, refreshes: &mut u32, on_event: &mut F) -> Phase
    where
        F: FnMut(RetryEvent<'_>),
    {
        *refreshes += 1;
        on_event(RetryEvent::Refreshed {
            refreshes: *refreshes,
        });
        Phase::Build
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::builder::format_balance_id;
    use crate::execution::executor::ExecutorSettings;
    use crate::testing::{
        claim_task, payment_task, rejected, timeout, ScriptedLedger, SubmitStep, PASSPHRASE,
    };
    use std::sync::Arc;

    fn executor(ledger: &Arc<ScriptedLedger>) -> TaskExecutor {
        TaskExecutor::new(
            ledger.clone(),
            ExecutorSettings {
                network_passphrase: PASSPHRASE.to_string(),
                tx_timeout_secs: 60,
            },
        )
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_stale_sequence_refreshes_once_then_succeeds() {
        let ledger = Arc::new(ScriptedLedger::new(10));
        ledger.script(vec![SubmitStep::Fail(rejected("tx_bad_seq")), SubmitStep::Accept]);
        let executor = executor(&ledger);
        let task = payment_task("stale");

        let initial = executor.prepare(&task).await.unwrap();
        // someone else used the sequence in the meantime
        ledger.set_sequence(11);

        let mut refreshed = 0;
        let outcome = policy(3)
            .run(&executor, &task, Some(initial), |event| {
                if let RetryEvent::Refreshed { .. } = event {
                    refreshed += 1;
                }
            })
            .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.refreshes, 1);
        assert_eq!(refreshed, 1);
        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 2);
        assert_ne!(submitted[0], submitted[1]);
    }

    #[tokio::test]
    async fn test_always_failing_stops_after_max_attempts() {
        let ledger = Arc::new(ScriptedLedger::new(10));
        ledger.always_fail(timeout());
        let executor = executor(&ledger);

        let outcome = policy(4)
            .run(&executor, &payment_task("flaky"), None, |_| {})
            .await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(ledger.submitted().len(), 4);
        assert!(matches!(
            outcome.result,
            SubmissionResult::Failed {
                class: FailureClass::Transient,
                ..
            }
        ));
        // the same envelope is resubmitted after a timeout
        assert_eq!(outcome.hashes.len(), 1);
    }

    #[tokio::test]
    async fn test_success_is_terminal() {
        let ledger = Arc::new(ScriptedLedger::new(10));
        let executor = executor(&ledger);

        let outcome = policy(5)
            .run(&executor, &payment_task("once"), None, |_| {})
            .await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(ledger.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let ledger = Arc::new(ScriptedLedger::new(10));
        ledger.script(vec![SubmitStep::Fail(rejected("tx_insufficient_balance"))]);
        let executor = executor(&ledger);

        let outcome = policy(5)
            .run(&executor, &payment_task("broke"), None, |_| {})
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(matches!(
            outcome.result,
            SubmissionResult::Failed {
                class: FailureClass::Permanent,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_lost_response_detected_without_resubmitting() {
        let ledger = Arc::new(ScriptedLedger::new(10));
        ledger.script(vec![SubmitStep::LostResponse]);
        let executor = executor(&ledger);

        let outcome = policy(3)
            .run(&executor, &payment_task("lost"), None, |_| {})
            .await;

        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            outcome.result,
            SubmissionResult::Succeeded {
                hash: submitted[0].clone()
            }
        );
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_resubmitted_copy_rejected_after_earlier_copy_landed() {
        let ledger = Arc::new(ScriptedLedger::new(10));
        ledger.script(vec![
            SubmitStep::Fail(timeout()),
            SubmitStep::LandedEarlier(rejected("tx_bad_seq")),
        ]);
        let executor = executor(&ledger);

        let outcome = policy(2)
            .run(&executor, &payment_task("late"), None, |_| {})
            .await;

        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0], submitted[1]);
        assert_eq!(
            outcome.result,
            SubmissionResult::Succeeded {
                hash: submitted[0].clone()
            }
        );
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_failed_on_ledger_is_permanent() {
        let ledger = Arc::new(ScriptedLedger::new(10));
        ledger.script(vec![SubmitStep::FailsOnLedger("op_underfunded")]);
        let executor = executor(&ledger);

        let outcome = policy(5)
            .run(&executor, &payment_task("underfunded"), None, |_| {})
            .await;

        assert_eq!(ledger.submitted().len(), 1);
        assert_eq!(outcome.attempts, 1);
        match outcome.result {
            SubmissionResult::Failed { reason, class } => {
                assert_eq!(class, FailureClass::Permanent);
                assert!(reason.contains("failed on ledger"));
                assert!(reason.contains("op_underfunded"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_vanished_balance_is_not_resubmitted() {
        let ledger = Arc::new(ScriptedLedger::new(10));
        let balance = [7u8; 32];
        ledger.add_claimable(&format_balance_id(&balance));
        let executor = executor(&ledger);
        let task = claim_task("claim", Some(balance));

        let initial = executor.prepare(&task).await.unwrap();
        // claimed elsewhere while our response timed out
        ledger.script(vec![SubmitStep::Fail(timeout())]);
        ledger.remove_claimable(&format_balance_id(&balance));

        let outcome = policy(5)
            .run(&executor, &task, Some(initial), |_| {})
            .await;

        assert_eq!(ledger.submitted().len(), 1);
        match outcome.result {
            SubmissionResult::Failed { reason, class } => {
                assert_eq!(class, FailureClass::Permanent);
                assert!(reason.contains("no longer claimable"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_failure_consumes_an_attempt() {
        let ledger = Arc::new(ScriptedLedger::new(10));
        let executor = executor(&ledger);

        // no claimable balances: building fails permanently
        let outcome = policy(3)
            .run(&executor, &claim_task("empty", None), None, |_| {})
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(ledger.submitted().is_empty());
        assert!(!outcome.succeeded());
    }
}
