pub mod models;
pub mod store;
pub mod testing;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

pub use models::{
    AccountChange, AccountStatus, BillingApplyOutcome, BillingMutation, CreditAccount,
    CreditTransaction, PaymentRecord, Reservation, TransactionReason,
};
pub use store::{LedgerStore, PgLedgerStore};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("credit account {0} not found")]
    AccountNotFound(i32),
    #[error("invalid credit amount {0}")]
    InvalidAmount(i64),
    #[error("ledger transaction exceeded {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    /// Failures the caller may safely retry as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Timeout(_) | LedgerError::Db(_))
    }
}

/// key: credit-ledger -> the only path that mutates balances
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    signup_balance: i64,
    billing_timeout: Duration,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, signup_balance: i64, billing_timeout: Duration) -> Self {
        Self {
            store,
            signup_balance,
            billing_timeout,
        }
    }

    /// Opens the account with the signup balance the first time it is seen.
    pub async fn ensure_account(&self, account_id: i32) -> Result<CreditAccount, LedgerError> {
        if let Some(account) = self.store.account(account_id).await? {
            return Ok(account);
        }
        let account = self
            .store
            .open_account(account_id, self.signup_balance)
            .await?;
        info!(
            account_id,
            balance = account.balance,
            "opened credit account"
        );
        Ok(account)
    }

    pub async fn account(&self, account_id: i32) -> Result<Option<CreditAccount>, LedgerError> {
        self.store.account(account_id).await
    }

    pub async fn reserve(
        &self,
        account_id: i32,
        amount: i64,
        related_job_id: &str,
    ) -> Result<Reservation, LedgerError> {
        let reservation = self
            .store
            .reserve(account_id, amount, related_job_id)
            .await?;
        if reservation.reserved {
            debug!(
                account_id,
                amount,
                balance = reservation.balance,
                job_id = related_job_id,
                "reserved credits"
            );
        } else {
            info!(
                account_id,
                required = amount,
                current = reservation.balance,
                "insufficient credits for reservation"
            );
        }
        Ok(reservation)
    }

    pub async fn refill(
        &self,
        account_id: i32,
        new_balance: i64,
        reason: TransactionReason,
        related_id: &str,
    ) -> Result<CreditAccount, LedgerError> {
        let account = self
            .store
            .refill(account_id, new_balance, reason, related_id)
            .await?;
        info!(
            account_id,
            balance = account.balance,
            reason = reason.as_str(),
            "credit balance set"
        );
        Ok(account)
    }

    pub async fn transactions(
        &self,
        account_id: i32,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        self.store.transactions(account_id, limit).await
    }

    /// Runs the whole billing mutation under the configured timeout. A timed
    /// out transaction is dropped, which rolls it back.
    pub async fn apply_billing(
        &self,
        mutation: &BillingMutation,
    ) -> Result<BillingApplyOutcome, LedgerError> {
        match tokio::time::timeout(self.billing_timeout, self.store.apply_billing(mutation)).await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    account_id = mutation.account_id,
                    event = %mutation.event_type,
                    dedup_key = %mutation.dedup_key,
                    "billing transaction timed out"
                );
                Err(LedgerError::Timeout(self.billing_timeout))
            }
        }
    }
}
