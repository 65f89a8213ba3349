use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::{
    AccountChange, AccountStatus, BillingApplyOutcome, BillingMutation, CreditAccount,
    CreditTransaction, PaymentRecord, Reservation, TransactionReason, DEFAULT_TIER,
};
use super::store::LedgerStore;
use super::LedgerError;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<i32, CreditAccount>,
    transactions: Vec<CreditTransaction>,
    payments: Vec<PaymentRecord>,
    processed_events: HashSet<String>,
}

impl LedgerState {
    fn append(
        &mut self,
        account_id: i32,
        delta: i64,
        balance_after: i64,
        reason: TransactionReason,
        related_id: Option<&str>,
    ) {
        let related = related_id.map(str::to_string);
        let (related_job_id, related_payment_id) = if reason.references_job() {
            (related, None)
        } else {
            (None, related)
        };
        self.transactions.push(CreditTransaction {
            id: Uuid::new_v4(),
            account_id,
            delta,
            balance_after,
            reason: reason.as_str().to_string(),
            related_job_id,
            related_payment_id,
            created_at: Utc::now(),
        });
    }

    fn ensure(&mut self, account_id: i32, initial_balance: i64) -> &mut CreditAccount {
        self.accounts.entry(account_id).or_insert_with(|| {
            let now = Utc::now();
            CreditAccount {
                account_id,
                balance: initial_balance,
                tier: DEFAULT_TIER.to_string(),
                status: AccountStatus::Free.as_str().to_string(),
                renewal_at: None,
                created_at: now,
                updated_at: now,
            }
        })
    }
}

/// Ledger store held in process memory. A single mutex serializes every
/// mutation, which gives the same atomicity the Postgres store gets from row
/// locks.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.state.lock().await.payments.clone()
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn open_account(
        &self,
        account_id: i32,
        initial_balance: i64,
    ) -> Result<CreditAccount, LedgerError> {
        if initial_balance < 0 {
            return Err(LedgerError::InvalidAmount(initial_balance));
        }
        let mut guard = self.state.lock().await;
        Ok(guard.ensure(account_id, initial_balance).clone())
    }

    async fn account(&self, account_id: i32) -> Result<Option<CreditAccount>, LedgerError> {
        Ok(self.state.lock().await.accounts.get(&account_id).cloned())
    }

    async fn reserve(
        &self,
        account_id: i32,
        amount: i64,
        related_job_id: &str,
    ) -> Result<Reservation, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut guard = self.state.lock().await;
        let account = guard
            .accounts
            .get_mut(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        if account.balance < amount {
            return Ok(Reservation {
                reserved: false,
                balance: account.balance,
            });
        }
        account.balance -= amount;
        account.updated_at = Utc::now();
        let balance = account.balance;
        guard.append(
            account_id,
            -amount,
            balance,
            TransactionReason::GenerationCharge,
            Some(related_job_id),
        );
        Ok(Reservation {
            reserved: true,
            balance,
        })
    }

    async fn refill(
        &self,
        account_id: i32,
        new_balance: i64,
        reason: TransactionReason,
        related_id: &str,
    ) -> Result<CreditAccount, LedgerError> {
        if new_balance < 0 {
            return Err(LedgerError::InvalidAmount(new_balance));
        }
        let mut guard = self.state.lock().await;
        let account = guard
            .accounts
            .get_mut(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        let delta = new_balance - account.balance;
        account.balance = new_balance;
        account.updated_at = Utc::now();
        let snapshot = account.clone();
        guard.append(account_id, delta, new_balance, reason, Some(related_id));
        Ok(snapshot)
    }

    async fn transactions(
        &self,
        account_id: i32,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        let guard = self.state.lock().await;
        Ok(guard
            .transactions
            .iter()
            .rev()
            .filter(|entry| entry.account_id == account_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn apply_billing(
        &self,
        mutation: &BillingMutation,
    ) -> Result<BillingApplyOutcome, LedgerError> {
        let mut guard = self.state.lock().await;
        if guard.processed_events.contains(&mutation.dedup_key) {
            return Ok(BillingApplyOutcome::Duplicate);
        }

        let account_id = mutation.account_id;
        let previous = guard.ensure(account_id, 0).balance;
        let now = Utc::now();
        match &mutation.change {
            AccountChange::Renew {
                payment,
                credits,
                tier,
                renewal_at,
                status,
            } => {
                guard.payments.push(payment.clone());
                let account = guard.ensure(account_id, 0);
                account.balance = *credits;
                account.tier = tier.clone();
                account.status = status.as_str().to_string();
                account.renewal_at = *renewal_at;
                account.updated_at = now;
                guard.append(
                    account_id,
                    credits - previous,
                    *credits,
                    TransactionReason::MonthlyRefill,
                    Some(&payment.external_id),
                );
            }
            AccountChange::Cancel => {
                let account = guard.ensure(account_id, 0);
                account.status = AccountStatus::Canceled.as_str().to_string();
                account.updated_at = now;
            }
            AccountChange::Expire => {
                let account = guard.ensure(account_id, 0);
                account.status = AccountStatus::Expired.as_str().to_string();
                account.balance = 0;
                account.updated_at = now;
                if previous != 0 {
                    guard.append(
                        account_id,
                        -previous,
                        0,
                        TransactionReason::SubscriptionExpiry,
                        Some(&mutation.dedup_key),
                    );
                }
            }
        }

        guard.processed_events.insert(mutation.dedup_key.clone());
        let account = guard.ensure(account_id, 0).clone();
        Ok(BillingApplyOutcome::Applied(account))
    }
}
