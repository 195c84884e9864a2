// Unlock Scheduler - one runner per task
//
// Each runner sleeps (single-shot) until `unlock - prepare lead`, builds and
// signs the transaction, sleeps again until the unlock instant and then hands
// the prepared transaction to the retry loop. Delays are recomputed from the
// clock after every wake-up, so there is no polling and no drift.

pub mod state;
pub mod unlock;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::execution::executor::{PreparedTransaction, TaskExecutor};
use crate::execution::retry::{RetryEvent, RetryPolicy, SubmissionOutcome, SubmissionResult};
use crate::ledger::models::format_stroops;
use crate::ledger::stream::AccountStream;
use crate::notify::Notifier;
use crate::tasks::{ResolvedTask, TaskAction};
use state::{StatusBoard, SubmissionBlocked, TaskStatus};
use unlock::DailyTrigger;

const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Wall clock, replaceable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub zone: FixedOffset,
    pub tolerance_ms: u64,
    pub prepare_lead: ChronoDuration,
    pub stream_sequences: bool,
    pub horizon_url: String,
}

/// What a cycle starts with
#[derive(Debug)]
pub enum CycleStart {
    Disabled,
    /// `None` when preparing failed; the retry loop builds instead
    Ready(Option<PreparedTransaction>),
}

pub struct Scheduler {
    tasks: Vec<Arc<ResolvedTask>>,
    board: Arc<StatusBoard>,
    executor: Arc<TaskExecutor>,
    audit: AuditLog,
    notifier: Option<Arc<Notifier>>,
    settings: SchedulerSettings,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        tasks: Vec<ResolvedTask>,
        executor: Arc<TaskExecutor>,
        audit: AuditLog,
        notifier: Option<Arc<Notifier>>,
        settings: SchedulerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let board = Arc::new(StatusBoard::new(
            tasks
                .iter()
                .map(|task| (task.name().to_string(), task.spec.enabled)),
        ));

        Self {
            tasks: tasks.into_iter().map(Arc::new).collect(),
            board,
            executor,
            audit,
            notifier,
            settings,
            clock,
        }
    }

    pub fn board(&self) -> Arc<StatusBoard> {
        self.board.clone()
    }

    pub fn tasks(&self) -> &[Arc<ResolvedTask>] {
        &self.tasks
    }

    /// Start one supervised runner per task, plus account streams when enabled
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.tasks.len());

        for task in &self.tasks {
            handles.push(tokio::spawn(Arc::clone(self).supervise(task.clone())));

            if self.settings.stream_sequences {
                let board = self.board.clone();
                let name = task.name().to_string();
                let stream = AccountStream::new(&self.settings.horizon_url, task.account_id());
                handles.push(tokio::spawn(async move {
                    stream
                        .run(move |sequence| board.record_sequence(&name, sequence))
                        .await
                }));
            }
        }

        info!("✅ Scheduler started with {} task(s)", self.tasks.len());
        handles
    }

    /// Restart the runner if it panics; other tasks are unaffected
    async fn supervise(self: Arc<Self>, task: Arc<ResolvedTask>) {
        loop {
            let runner = tokio::spawn(Arc::clone(&self).run_task(task.clone()));
            match runner.await {
                Ok(()) => return,
                Err(e) if e.is_panic() => {
                    error!("❌ [{}] Runner panicked, restarting: {}", task.name(), e);
                    self.board.update(task.name(), |state| {
                        state.in_flight = false;
                        state.last_error = Some("runner panicked".to_string());
                    });
                    tokio::time::sleep(RESTART_DELAY).await;
                }
                Err(e) => {
                    warn!("⚠️  [{}] Runner cancelled: {}", task.name(), e);
                    return;
                }
            }
        }
    }

    /// The occurrence the runner should work towards next
    fn next_target(&self, task: &ResolvedTask, trigger: &DailyTrigger) -> DateTime<Utc> {
        let now = self.clock.now();
        let unlock = task.spec.unlock_time;
        let nearest = unlock.nearest_occurrence(now, self.settings.zone);
        let tolerance = ChronoDuration::milliseconds(self.settings.tolerance_ms as i64);

        // started (or woke) just after an unlock that has not fired yet
        if nearest <= now && now - nearest <= tolerance && trigger.last_fired() != Some(nearest) {
            return nearest;
        }

        let next = unlock.next_occurrence(now, self.settings.zone);
        match trigger.last_fired() {
            Some(fired) if next <= fired => unlock.next_occurrence(fired, self.settings.zone),
            _ => next,
        }
    }

    async fn sleep_until(&self, at: DateTime<Utc>) {
        let delay = at - self.clock.now();
        if let Ok(delay) = delay.to_std() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_task(self: Arc<Self>, task: Arc<ResolvedTask>) {
        let mut trigger = DailyTrigger::new(
            task.spec.unlock_time,
            self.settings.zone,
            self.settings.tolerance_ms,
        );
        // after a restart, the cycle already submitted stays fired
        if let Some(state) = self.board.get(task.name()) {
            if let (true, Some(cycle)) = (state.submitted, state.cycle) {
                trigger.fire_at(cycle);
            }
        }

        loop {
            let occurrence = self.next_target(&task, &trigger);
            self.board
                .update(task.name(), |state| state.next_unlock = Some(occurrence));
            info!(
                "⏰ [{}] Next unlock at {} ({})",
                task.name(),
                occurrence.with_timezone(&self.settings.zone).format("%Y-%m-%d %H:%M:%S%.3f"),
                task.action.as_str()
            );

            self.sleep_until(occurrence - self.settings.prepare_lead).await;
            let prepared = match self.prepare_cycle(&task, occurrence).await {
                CycleStart::Disabled => {
                    trigger.fire_at(occurrence);
                    self.sleep_until(occurrence).await;
                    continue;
                }
                CycleStart::Ready(prepared) => prepared,
            };

            self.sleep_until(occurrence).await;

            let now = self.clock.now();
            if !trigger.should_fire(now) {
                if trigger.last_fired() == Some(occurrence) {
                    continue;
                }
                warn!(
                    "⚠️  [{}] Woke {}ms after the unlock, firing late",
                    task.name(),
                    (now - occurrence).num_milliseconds()
                );
                trigger.fire_at(occurrence);
            }

            if let Err(blocked) = self.fire(&task, prepared).await {
                warn!("⚠️  [{}] Not submitted: {}", task.name(), blocked);
            }
        }
    }

    /// Reset run state for the cycle and build the transaction ahead of time
    pub async fn prepare_cycle(&self, task: &ResolvedTask, occurrence: DateTime<Utc>) -> CycleStart {
        self.board.begin_cycle(task.name(), occurrence);

        if !self.board.is_enabled(task.name()) {
            info!("⏸️  [{}] Disabled, skipping this cycle", task.name());
            self.board
                .update(task.name(), |state| state.status = TaskStatus::Disabled);
            return CycleStart::Disabled;
        }

        match self.executor.prepare(task).await {
            Ok(prepared) => {
                self.board.update(task.name(), |state| {
                    state.prepared = true;
                    state.status = TaskStatus::Prepared;
                    state.tx_hash = Some(prepared.hash().to_string());
                });
                CycleStart::Ready(Some(prepared))
            }
            Err(e) => {
                warn!(
                    "⚠️  [{}] Prepare failed, will build at unlock: {}",
                    task.name(),
                    e
                );
                self.board
                    .update(task.name(), |state| state.last_error = Some(e.to_string()));
                CycleStart::Ready(None)
            }
        }
    }

    /// Run the submission sequence for this cycle.
    ///
    /// Refuses to start when the task is disabled, already submitted this
    /// cycle, or has a sequence in flight.
    pub async fn fire(
        &self,
        task: &ResolvedTask,
        prepared: Option<PreparedTransaction>,
    ) -> Result<SubmissionOutcome, SubmissionBlocked> {
        let _guard = self.board.try_begin_submission(task.name())?;
        let name = task.name();

        let prepared = match (prepared, self.board.get(name).and_then(|s| s.cached_sequence)) {
            (Some(prepared), Some(cached)) if cached != prepared.source_sequence() => {
                info!(
                    "🔄 [{}] Sequence moved to {} since prepare ({}), rebuilding",
                    name,
                    cached,
                    prepared.source_sequence()
                );
                self.board.update(name, |state| state.refresh_count += 1);
                None
            }
            (prepared, _) => prepared,
        };

        if let Some(prepared) = &prepared {
            info!(
                "🎯 [{}] Firing {} ({} op(s), fee {}/op, built {}ms ago)",
                name,
                prepared.hash(),
                prepared.operation_count,
                prepared.per_operation_fee,
                (self.clock.now() - prepared.built_at).num_milliseconds()
            );
        }

        let board = self.board.clone();
        let policy = RetryPolicy::from(&task.spec.retry);
        let outcome = policy
            .run(&self.executor, task, prepared, |event| match event {
                RetryEvent::Attempt { number, hash } => {
                    board.update(name, |state| {
                        state.attempt_count = number;
                        state.tx_hash = Some(hash.to_string());
                    });
                }
                RetryEvent::AttemptFailed { number, error } => {
                    debug!("[{}] attempt {} failed", name, number);
                    board.update(name, |state| {
                        state.attempt_count = number;
                        state.last_error = Some(error.to_string());
                    });
                }
                RetryEvent::Refreshed { refreshes } => {
                    debug!("[{}] rebuilt from fresh state ({} this run)", name, refreshes);
                    board.update(name, |state| state.refresh_count += 1);
                }
            })
            .await;

        self.board.update(name, |state| {
            state.attempt_count = outcome.attempts;
            match &outcome.result {
                SubmissionResult::Succeeded { hash } => {
                    state.status = TaskStatus::Succeeded;
                    state.tx_hash = Some(hash.clone());
                    state.last_error = None;
                }
                SubmissionResult::Failed { reason, .. } => {
                    state.status = TaskStatus::Failed;
                    state.last_error = Some(reason.clone());
                }
            }
        });

        if !outcome.succeeded() && !outcome.hashes.is_empty() {
            warn!(
                "⚠️  [{}] None of {} landed: {}",
                name,
                if outcome.hashes.len() == 1 { "this hash" } else { "these hashes" },
                outcome.hashes.join(", ")
            );
        }

        self.record(task, &outcome).await;
        Ok(outcome)
    }

    async fn record(&self, task: &ResolvedTask, outcome: &SubmissionOutcome) {
        match &outcome.result {
            SubmissionResult::Succeeded { hash } => {
                let detail = match (task.action, task.amount) {
                    (TaskAction::Claim, _) => match &task.claim_id {
                        Some(_) => "1 balance".to_string(),
                        None => "claimable balances".to_string(),
                    },
                    (_, Some(amount)) => format_stroops(amount),
                    (_, None) => "balance".to_string(),
                };
                self.audit
                    .success(task.name(), task.action, &detail, hash)
                    .await;
            }
            SubmissionResult::Failed { reason, .. } => {
                self.audit.failure(task.name(), task.action, reason).await;
            }
        }

        if let Some(notifier) = &self.notifier {
            notifier.cycle_finished(task.name(), task.action, outcome).await;
        }
    }
}
