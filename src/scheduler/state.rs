use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Prepared,
    Submitting,
    Succeeded,
    Failed,
    Disabled,
}

/// Runtime state of one task for the current cycle
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    /// Unlock instant the current cycle targets
    pub cycle: Option<DateTime<Utc>>,
    pub cycle_id: Option<Uuid>,
    pub status: TaskStatus,
    pub prepared: bool,
    pub submitted: bool,
    pub in_flight: bool,
    pub attempt_count: u32,
    pub refresh_count: u32,
    /// Latest sequence seen on the account stream
    pub cached_sequence: Option<i64>,
    pub tx_hash: Option<String>,
    pub last_error: Option<String>,
    pub next_unlock: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub enabled: bool,
}

impl RunState {
    fn new(enabled: bool) -> Self {
        Self {
            cycle: None,
            cycle_id: None,
            status: if enabled {
                TaskStatus::Idle
            } else {
                TaskStatus::Disabled
            },
            prepared: false,
            submitted: false,
            in_flight: false,
            attempt_count: 0,
            refresh_count: 0,
            cached_sequence: None,
            tx_hash: None,
            last_error: None,
            next_unlock: None,
            updated_at: Utc::now(),
            enabled,
        }
    }
}

/// Why a trigger did not start a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionBlocked {
    #[error("a submission is already in flight")]
    AlreadyInFlight,
    #[error("already submitted this cycle")]
    AlreadySubmitted,
    #[error("task is disabled")]
    Disabled,
    #[error("unknown task")]
    UnknownTask,
}

/// Per-task run state, shared by the runners and the HTTP handlers
#[derive(Debug, Default)]
pub struct StatusBoard {
    states: RwLock<HashMap<String, RunState>>,
}

impl StatusBoard {
    pub fn new<I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        let states = tasks
            .into_iter()
            .map(|(name, enabled)| (name, RunState::new(enabled)))
            .collect();
        Self {
            states: RwLock::new(states),
        }
    }

    /// Name-ordered copy of every task's state
    pub fn snapshot(&self) -> BTreeMap<String, RunState> {
        self.states
            .read()
            .iter()
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<RunState> {
        self.states.read().get(name).cloned()
    }

    /// Apply `f` to a task's state; false if the task is unknown
    pub fn update<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut RunState),
    {
        match self.states.write().get_mut(name) {
            Some(state) => {
                f(state);
                state.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Reset a task for the cycle targeting `cycle`.
    ///
    /// Beginning the cycle already in progress keeps its state, so a
    /// restarted runner cannot submit the same cycle twice.
    pub fn begin_cycle(&self, name: &str, cycle: DateTime<Utc>) -> Option<Uuid> {
        let mut id = None;
        self.update(name, |state| {
            if state.cycle != Some(cycle) {
                let mut fresh = RunState::new(state.enabled);
                fresh.cycle = Some(cycle);
                fresh.cycle_id = Some(Uuid::new_v4());
                fresh.cached_sequence = state.cached_sequence;
                fresh.next_unlock = state.next_unlock;
                *state = fresh;
            }
            id = state.cycle_id;
        });
        id
    }

    /// Claim the right to submit for the current cycle.
    ///
    /// Succeeds at most once per cycle; the returned guard clears
    /// `in_flight` when dropped.
    pub fn try_begin_submission(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<InFlightGuard, SubmissionBlocked> {
        let mut states = self.states.write();
        let state = states.get_mut(name).ok_or(SubmissionBlocked::UnknownTask)?;

        if !state.enabled {
            return Err(SubmissionBlocked::Disabled);
        }
        if state.in_flight {
            return Err(SubmissionBlocked::AlreadyInFlight);
        }
        if state.submitted {
            return Err(SubmissionBlocked::AlreadySubmitted);
        }

        state.in_flight = true;
        state.submitted = true;
        state.status = TaskStatus::Submitting;
        state.updated_at = Utc::now();

        Ok(InFlightGuard {
            board: Arc::clone(self),
            name: name.to_string(),
        })
    }

    /// Takes effect at the runner's next check; false if the task is unknown
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        self.update(name, |state| {
            state.enabled = enabled;
            if !enabled && !state.in_flight {
                state.status = TaskStatus::Disabled;
            } else if enabled && state.status == TaskStatus::Disabled {
                state.status = TaskStatus::Idle;
            }
        })
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.states
            .read()
            .get(name)
            .map(|state| state.enabled)
            .unwrap_or(false)
    }

    pub fn record_sequence(&self, name: &str, sequence: i64) {
        self.update(name, |state| state.cached_sequence = Some(sequence));
    }
}

/// Held for the duration of one submission sequence
#[derive(Debug)]
pub struct InFlightGuard {
    board: Arc<StatusBoard>,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.board.update(&self.name, |state| state.in_flight = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> Arc<StatusBoard> {
        Arc::new(StatusBoard::new(vec![
            ("a".to_string(), true),
            ("b".to_string(), false),
        ]))
    }

    #[test]
    fn test_initial_status() {
        let board = board();
        assert_eq!(board.snapshot().len(), 2);
        assert_eq!(board.get("a").unwrap().status, TaskStatus::Idle);
        assert_eq!(board.get("b").unwrap().status, TaskStatus::Disabled);
        assert!(board.get("c").is_none());
        assert_eq!(
            board.snapshot().keys().cloned().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_submission_guard_once_per_cycle() {
        let board = board();
        board.begin_cycle("a", Utc::now()).unwrap();

        let guard = board.try_begin_submission("a").unwrap();
        assert!(board.get("a").unwrap().in_flight);
        assert_eq!(
            board.try_begin_submission("a").unwrap_err(),
            SubmissionBlocked::AlreadyInFlight
        );

        drop(guard);
        let state = board.get("a").unwrap();
        assert!(!state.in_flight);
        assert!(state.submitted);
        assert_eq!(
            board.try_begin_submission("a").unwrap_err(),
            SubmissionBlocked::AlreadySubmitted
        );

        // the next cycle starts clean
        board
            .begin_cycle("a", Utc::now() + chrono::Duration::days(1))
            .unwrap();
        assert!(board.try_begin_submission("a").is_ok());
    }

    #[test]
    fn test_disabled_and_unknown_tasks_are_blocked() {
        let board = board();
        assert_eq!(
            board.try_begin_submission("b").unwrap_err(),
            SubmissionBlocked::Disabled
        );
        assert_eq!(
            board.try_begin_submission("zzz").unwrap_err(),
            SubmissionBlocked::UnknownTask
        );

        assert!(board.set_enabled("b", true));
        assert!(board.is_enabled("b"));
        assert_eq!(board.get("b").unwrap().status, TaskStatus::Idle);
        assert!(!board.set_enabled("zzz", true));
    }

    #[test]
    fn test_same_cycle_is_not_reset() {
        let board = board();
        let cycle = Utc::now();
        let id = board.begin_cycle("a", cycle).unwrap();
        drop(board.try_begin_submission("a").unwrap());

        assert_eq!(board.begin_cycle("a", cycle), Some(id));
        assert!(board.get("a").unwrap().submitted);
        assert_eq!(
            board.try_begin_submission("a").unwrap_err(),
            SubmissionBlocked::AlreadySubmitted
        );
    }

    #[test]
    fn test_begin_cycle_keeps_stream_state() {
        let board = board();
        board.record_sequence("a", 42);
        board.update("a", |s| {
            s.attempt_count = 3;
            s.last_error = Some("boom".into());
        });

        let id = board.begin_cycle("a", Utc::now());
        assert!(id.is_some());
        let state = board.get("a").unwrap();
        assert_eq!(state.cached_sequence, Some(42));
        assert_eq!(state.attempt_count, 0);
        assert!(state.last_error.is_none());
        assert_eq!(state.cycle_id, id);
        assert!(board.begin_cycle("zzz", Utc::now()).is_none());
    }
}
