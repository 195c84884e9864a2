use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::ledger::models::{
    AccountInfo, AccountResponse, ClaimableBalance, FeeStats, Page, Problem, SubmitResponse,
    TransactionRecord, TxStatus,
};
use crate::ledger::LedgerClient;

const CLAIMABLE_PAGE_LIMIT: u32 = 200;

/// Horizon REST client
#[derive(Debug, Clone)]
pub struct HorizonClient {
    base_url: String,
    client: reqwest::Client,
}

impl HorizonClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-2xx response into a classified error
    async fn error_from(response: Response) -> LedgerError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::NOT_FOUND {
            return LedgerError::NotFound(body);
        }

        if status == StatusCode::BAD_REQUEST {
            if let Ok(problem) = serde_json::from_str::<Problem>(&body) {
                if let Some(codes) = problem.result_codes() {
                    return LedgerError::Rejected {
                        status: status.as_u16(),
                        codes,
                    };
                }
            }
        }

        LedgerError::Http {
            status: status.as_u16(),
            body,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, LedgerError> {
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response.json::<T>().await?)
    }

    /// GET that maps 404 to `false`
    async fn exists(&self, path: &str) -> Result<bool, LedgerError> {
        let response = self.client.get(self.url(path)).send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::error_from(response).await),
        }
    }
}

#[async_trait]
impl LedgerClient for HorizonClient {
    async fn load_account(&self, account_id: &str) -> Result<AccountInfo, LedgerError> {
        let response: AccountResponse = self.get_json(&format!("/accounts/{}", account_id)).await?;
        let info = AccountInfo::try_from(response)?;
        debug!("Loaded {} at sequence {}", info.account_id, info.sequence);
        Ok(info)
    }

    async fn fetch_base_fee(&self) -> Result<u32, LedgerError> {
        let stats: FeeStats = self.get_json("/fee_stats").await?;
        stats
            .last_ledger_base_fee
            .parse::<u32>()
            .map_err(|_| LedgerError::Decode(format!("base fee '{}'", stats.last_ledger_base_fee)))
    }

    async fn claimable_balances(
        &self,
        claimant: &str,
    ) -> Result<Vec<ClaimableBalance>, LedgerError> {
        let page: Page<ClaimableBalance> = self
            .get_json(&format!(
                "/claimable_balances?claimant={}&limit={}",
                claimant, CLAIMABLE_PAGE_LIMIT
            ))
            .await?;

        let (native, other): (Vec<_>, Vec<_>) = page
            .embedded
            .records
            .into_iter()
            .partition(|balance| balance.asset == "native");

        if !other.is_empty() {
            warn!(
                "⚠️  Skipping {} non-native claimable balance(s) for {}",
                other.len(),
                claimant
            );
        }

        Ok(native)
    }

    async fn claimable_balance_exists(&self, balance_id: &str) -> Result<bool, LedgerError> {
        self.exists(&format!("/claimable_balances/{}", balance_id)).await
    }

    async fn submit(&self, envelope_xdr: &str) -> Result<String, LedgerError> {
        let response = self
            .client
            .post(self.url("/transactions"))
            .form(&[("tx", envelope_xdr)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let submitted: SubmitResponse = response.json().await?;
        debug!(
            "Horizon accepted {} (ledger {:?})",
            submitted.hash, submitted.ledger
        );
        Ok(submitted.hash)
    }

    async fn transaction_status(&self, hash: &str) -> Result<TxStatus, LedgerError> {
        let response = self
            .client
            .get(self.url(&format!("/transactions/{}", hash)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(TxStatus::Missing),
            status if status.is_success() => {
                let record: TransactionRecord = response.json().await?;
                if record.hash != hash {
                    warn!("⚠️  Asked for transaction {}, got {}", hash, record.hash);
                }
                Ok(record.status())
            }
            _ => Err(Self::error_from(response).await),
        }
    }
}
