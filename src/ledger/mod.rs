pub mod horizon;
pub mod models;
pub mod stream;

use async_trait::async_trait;

use crate::error::LedgerError;
use models::{AccountInfo, ClaimableBalance, TxStatus};

pub use horizon::HorizonClient;

/// The ledger operations the bot depends on.
///
/// Implemented against Horizon in production and by scripted mocks in tests.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn load_account(&self, account_id: &str) -> Result<AccountInfo, LedgerError>;

    /// Network base fee per operation, in stroops
    async fn fetch_base_fee(&self) -> Result<u32, LedgerError>;

    /// Balances the account can claim (native asset only)
    async fn claimable_balances(
        &self,
        claimant: &str,
    ) -> Result<Vec<ClaimableBalance>, LedgerError>;

    async fn claimable_balance_exists(&self, balance_id: &str) -> Result<bool, LedgerError>;

    /// Submit a base64 envelope; returns the applied transaction hash
    async fn submit(&self, envelope_xdr: &str) -> Result<String, LedgerError>;

    /// Whether a transaction with this hash made it into a ledger, and
    /// whether it succeeded there
    async fn transaction_status(&self, hash: &str) -> Result<TxStatus, LedgerError>;
}
