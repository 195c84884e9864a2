use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::handler::AppState;
use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::AppResult;
use crate::execution::executor::{ExecutorSettings, TaskExecutor};
use crate::ledger::HorizonClient;
use crate::notify::Notifier;
use crate::scheduler::{Scheduler, SchedulerSettings, SystemClock};
use crate::tasks::{load_tasks, resolve_tasks, TaskFile};

/// Load and validate everything, then start the task runners.
///
/// Any invalid task aborts startup before a single runner is spawned.
pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let specs = load_tasks(&config.tasks_file)?;
    let tasks = resolve_tasks(&specs)?;
    for task in &tasks {
        info!(
            "✅ [{}] {} at {} for {}{}",
            task.name(),
            task.action.as_str(),
            task.spec.unlock_time,
            task.account_id(),
            if task.spec.enabled { "" } else { " (disabled)" }
        );
    }

    let zone = config.zone()?;

    let horizon = HorizonClient::new(
        &config.horizon_url,
        Duration::from_millis(config.request_timeout_ms),
    )?;
    info!("✅ Horizon client initialized for {}", horizon.base_url());

    let executor = Arc::new(TaskExecutor::new(
        Arc::new(horizon),
        ExecutorSettings {
            network_passphrase: config.network_passphrase.clone(),
            tx_timeout_secs: config.tx_timeout_secs,
        },
    ));

    let notifier = match config.email_settings() {
        Some((api_key, from, to)) => {
            info!("✅ Email notifications enabled for {}", to);
            Some(Arc::new(Notifier::new(api_key, from, to)))
        }
        None => {
            warn!("⚠️  RESEND_API_KEY / NOTIFY_EMAIL_FROM / NOTIFY_EMAIL_TO not set - email disabled");
            None
        }
    };

    let scheduler = Arc::new(Scheduler::new(
        tasks,
        executor,
        AuditLog::new(&config.success_log, &config.failure_log),
        notifier,
        SchedulerSettings {
            zone,
            tolerance_ms: config.tolerance_ms,
            prepare_lead: ChronoDuration::milliseconds(config.prepare_lead_ms as i64),
            stream_sequences: config.stream_sequences,
            horizon_url: config.horizon_url.clone(),
        },
        Arc::new(SystemClock),
    ));

    // Runners live for the life of the process; their handles are not awaited
    let handles = scheduler.start();
    info!("🔄 {} background job(s) running", handles.len());

    Ok(AppState::new(
        &scheduler,
        Some(TaskFile::new(&config.tasks_file, specs)),
    ))
}
