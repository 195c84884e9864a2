use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading service or task configuration.
///
/// These are fatal at startup: a task list with a single bad record is
/// rejected as a whole.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Task #{index} ({name}): {message}")]
    InvalidTask {
        index: usize,
        name: String,
        message: String,
    },

    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("Environment variable {var} referenced by task {task} is not set")]
    MissingSecret { task: String, var: String },

    #[error("Service settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Invalid setting {name}: {message}")]
    InvalidSetting { name: &'static str, message: String },
}

/// How a failed ledger call should be handled by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network trouble or an overloaded API. The outcome of a submit may be
    /// unknown, so remote state has to be reconciled before retrying.
    Transient,
    /// Local state (sequence, fee, time bounds) is out of date: rebuild first.
    StaleState,
    /// The ledger will keep rejecting this transaction.
    Permanent,
}

/// Result codes Horizon attaches to a rejected transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultCodes {
    pub transaction: Option<String>,
    pub operations: Vec<String>,
}

impl ResultCodes {
    fn contains(&self, code: &str) -> bool {
        self.transaction.as_deref() == Some(code) || self.operations.iter().any(|c| c == code)
    }
}

impl std::fmt::Display for ResultCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}]",
            self.transaction.as_deref().unwrap_or("-"),
            self.operations.join(", ")
        )
    }
}

const STALE_CODES: [&str; 4] = [
    "tx_bad_seq",
    "tx_too_early",
    "tx_too_late",
    "tx_insufficient_fee",
];

/// Errors talking to the ledger API
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Horizon returned {status}: {codes}")]
    Rejected { status: u16, codes: ResultCodes },

    #[error("Horizon returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl LedgerError {
    pub fn class(&self) -> FailureClass {
        match self {
            LedgerError::Transport(_) => FailureClass::Transient,
            LedgerError::Rejected { codes, .. } => {
                if STALE_CODES.iter().any(|code| codes.contains(code)) {
                    FailureClass::StaleState
                } else {
                    FailureClass::Permanent
                }
            }
            LedgerError::Http { status, .. } if *status == 429 || *status >= 500 => {
                FailureClass::Transient
            }
            LedgerError::Http { .. } => FailureClass::Permanent,
            LedgerError::NotFound(_) => FailureClass::Permanent,
            LedgerError::Decode(_) => FailureClass::Transient,
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            LedgerError::Decode(error.to_string())
        } else {
            LedgerError::Transport(error.to_string())
        }
    }
}

/// Errors while building or signing a transaction
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid claimable balance id: {0}")]
    InvalidBalanceId(String),

    #[error("No claimable balances found for {0}")]
    NothingToClaim(String),

    #[error("Balance {balance} leaves nothing above reserve {reserve}")]
    NothingToSweep { balance: String, reserve: String },

    #[error("Sequence number overflow")]
    SequenceOverflow,

    #[error("XDR encoding failed: {0}")]
    Xdr(String),
}

impl AppError {
    /// Only ledger errors can be worth retrying
    pub fn failure_class(&self) -> FailureClass {
        match self {
            AppError::Ledger(e) => e.class(),
            _ => FailureClass::Permanent,
        }
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            AppError::Ledger(_) => (StatusCode::BAD_GATEWAY, "LEDGER_ERROR"),
            AppError::Execution(_) => (StatusCode::INTERNAL_SERVER_ERROR, "EXECUTION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
