use base64::Engine;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use stellar_xdr::curr::{Limits, ReadXdr, TransactionResult, TransactionResultResult};

use crate::error::{ExecutionError, LedgerError, ResultCodes};

/// Native amounts are fixed point with 7 decimals (1 unit = 10,000,000 stroops)
pub const STROOPS_PER_UNIT: i64 = 10_000_000;

/// Parse a decimal amount string ("12.5") into stroops
pub fn parse_stroops(amount: &str) -> Result<i64, ExecutionError> {
    let invalid = || ExecutionError::InvalidAmount(amount.to_string());

    let value = Decimal::from_str(amount.trim()).map_err(|_| invalid())?;
    if value.scale() > 7 {
        return Err(invalid());
    }
    value
        .checked_mul(Decimal::from(STROOPS_PER_UNIT))
        .and_then(|stroops| stroops.to_i64())
        .ok_or_else(invalid)
}

/// Format stroops back into a 7-decimal amount string
pub fn format_stroops(stroops: i64) -> String {
    Decimal::new(stroops, 7).to_string()
}

/// Account state needed to build a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_id: String,
    pub sequence: i64,
    /// Native balance in stroops
    pub native_balance: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub account_id: String,
    pub sequence: String,
    #[serde(default)]
    pub balances: Vec<BalanceLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceLine {
    pub balance: String,
    pub asset_type: String,
}

impl TryFrom<AccountResponse> for AccountInfo {
    type Error = LedgerError;

    fn try_from(response: AccountResponse) -> Result<Self, Self::Error> {
        let sequence = response
            .sequence
            .parse::<i64>()
            .map_err(|_| LedgerError::Decode(format!("sequence '{}'", response.sequence)))?;

        let native_balance = match response.balances.iter().find(|b| b.asset_type == "native") {
            Some(line) => parse_stroops(&line.balance)
                .map_err(|_| LedgerError::Decode(format!("balance '{}'", line.balance)))?,
            None => 0,
        };

        Ok(Self {
            account_id: response.account_id,
            sequence,
            native_balance,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeStats {
    pub last_ledger_base_fee: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimableBalance {
    pub id: String,
    pub amount: String,
    pub asset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(rename = "_embedded")]
    pub embedded: Embedded<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Embedded<T> {
    pub records: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub hash: String,
    #[serde(default)]
    pub ledger: Option<u64>,
}

/// A transaction as Horizon reports it once it is in a ledger
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub successful: bool,
    #[serde(default)]
    pub result_xdr: Option<String>,
}

/// Where a submitted transaction ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Not in any ledger
    Missing,
    Applied,
    /// In a ledger but failed; its sequence number is used up
    Failed(ResultCodes),
}

impl TransactionRecord {
    pub fn status(&self) -> TxStatus {
        if self.successful {
            return TxStatus::Applied;
        }
        let code = self
            .result_xdr
            .as_deref()
            .and_then(result_code)
            .unwrap_or_else(|| "tx_failed".to_string());
        TxStatus::Failed(ResultCodes {
            transaction: Some(code),
            operations: Vec::new(),
        })
    }
}

/// Transaction result code (`tx_failed`, `tx_bad_auth`, ...) from result XDR
fn result_code(result_xdr: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(result_xdr)
        .ok()?;
    let result = TransactionResult::from_xdr(bytes, Limits::none()).ok()?;
    let name = match &result.result {
        TransactionResultResult::TxFeeBumpInnerFailed(pair) => pair.result.result.name(),
        other => other.name(),
    };
    Some(snake_case(name))
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Horizon problem document (RFC 7807) returned on errors
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Problem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub extras: Option<ProblemExtras>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProblemExtras {
    #[serde(default)]
    pub result_codes: Option<RawResultCodes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResultCodes {
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub operations: Option<Vec<String>>,
}

impl Problem {
    pub fn result_codes(&self) -> Option<ResultCodes> {
        let raw = self.extras.as_ref()?.result_codes.as_ref()?;
        Some(ResultCodes {
            transaction: raw.transaction.clone(),
            operations: raw.operations.clone().unwrap_or_default(),
        })
    }
}
