use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::{
    AccountChange, AccountStatus, BillingApplyOutcome, BillingMutation, CreditAccount,
    CreditTransaction, Reservation, TransactionReason, DEFAULT_TIER,
};
use super::LedgerError;

/// Durable backing for the credit ledger. Every balance mutation and its
/// transaction record must commit or roll back together.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates the account with `initial_balance` unless it already exists.
    async fn open_account(
        &self,
        account_id: i32,
        initial_balance: i64,
    ) -> Result<CreditAccount, LedgerError>;

    async fn account(&self, account_id: i32) -> Result<Option<CreditAccount>, LedgerError>;

    /// Atomic check-and-decrement. Never leaves the balance negative.
    async fn reserve(
        &self,
        account_id: i32,
        amount: i64,
        related_job_id: &str,
    ) -> Result<Reservation, LedgerError>;

    /// Sets the balance to an absolute value.
    async fn refill(
        &self,
        account_id: i32,
        new_balance: i64,
        reason: TransactionReason,
        related_id: &str,
    ) -> Result<CreditAccount, LedgerError>;

    async fn transactions(
        &self,
        account_id: i32,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, LedgerError>;

    /// Applies a webhook-driven change together with its dedup marker.
    async fn apply_billing(
        &self,
        mutation: &BillingMutation,
    ) -> Result<BillingApplyOutcome, LedgerError>;
}

/// key: ledger-store-postgres -> conditional updates inside one transaction
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct NewTransaction<'a> {
    account_id: i32,
    delta: i64,
    balance_after: i64,
    reason: TransactionReason,
    related_id: Option<&'a str>,
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Postgres>,
    entry: NewTransaction<'_>,
) -> Result<(), sqlx::Error> {
    let (related_job_id, related_payment_id) = if entry.reason.references_job() {
        (entry.related_id, None)
    } else {
        (None, entry.related_id)
    };
    sqlx::query(
        r#"
        INSERT INTO credit_transactions (
            id,
            account_id,
            delta,
            balance_after,
            reason,
            related_job_id,
            related_payment_id
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.account_id)
    .bind(entry.delta)
    .bind(entry.balance_after)
    .bind(entry.reason.as_str())
    .bind(related_job_id)
    .bind(related_payment_id)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

async fn ensure_account_row(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i32,
    initial_balance: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO credit_accounts (account_id, balance, tier, status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (account_id) DO NOTHING
        "#,
    )
    .bind(account_id)
    .bind(initial_balance)
    .bind(DEFAULT_TIER)
    .bind(AccountStatus::Free.as_str())
    .execute(&mut *tx)
    .await?;
    Ok(())
}

async fn lock_account(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i32,
) -> Result<Option<CreditAccount>, sqlx::Error> {
    sqlx::query_as::<_, CreditAccount>(
        "SELECT * FROM credit_accounts WHERE account_id = $1 FOR UPDATE",
    )
    .bind(account_id)
    .fetch_optional(&mut *tx)
    .await
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn open_account(
        &self,
        account_id: i32,
        initial_balance: i64,
    ) -> Result<CreditAccount, LedgerError> {
        if initial_balance < 0 {
            return Err(LedgerError::InvalidAmount(initial_balance));
        }
        let mut tx = self.pool.begin().await?;
        ensure_account_row(&mut tx, account_id, initial_balance).await?;
        let account = lock_account(&mut tx, account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        tx.commit().await?;
        Ok(account)
    }

    async fn account(&self, account_id: i32) -> Result<Option<CreditAccount>, LedgerError> {
        let account = sqlx::query_as::<_, CreditAccount>(
            "SELECT * FROM credit_accounts WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
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

        let mut tx = self.pool.begin().await?;
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE credit_accounts
            SET balance = balance - $2, updated_at = NOW()
            WHERE account_id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = updated else {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT balance FROM credit_accounts WHERE account_id = $1")
                    .bind(account_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return match current {
                Some(balance) => Ok(Reservation {
                    reserved: false,
                    balance,
                }),
                None => Err(LedgerError::AccountNotFound(account_id)),
            };
        };

        insert_transaction(
            &mut tx,
            NewTransaction {
                account_id,
                delta: -amount,
                balance_after: balance,
                reason: TransactionReason::GenerationCharge,
                related_id: Some(related_job_id),
            },
        )
        .await?;
        tx.commit().await?;

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

        let mut tx = self.pool.begin().await?;
        let current = lock_account(&mut tx, account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        let account = sqlx::query_as::<_, CreditAccount>(
            r#"
            UPDATE credit_accounts
            SET balance = $2, updated_at = NOW()
            WHERE account_id = $1
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(new_balance)
        .fetch_one(&mut *tx)
        .await?;
        insert_transaction(
            &mut tx,
            NewTransaction {
                account_id,
                delta: new_balance - current.balance,
                balance_after: new_balance,
                reason,
                related_id: Some(related_id),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn transactions(
        &self,
        account_id: i32,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        let rows = sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT * FROM credit_transactions
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn apply_billing(
        &self,
        mutation: &BillingMutation,
    ) -> Result<BillingApplyOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO billing_events (dedup_key, event_type, account_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(&mutation.dedup_key)
        .bind(&mutation.event_type)
        .bind(mutation.account_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(BillingApplyOutcome::Duplicate);
        }

        ensure_account_row(&mut tx, mutation.account_id, 0).await?;
        let current = lock_account(&mut tx, mutation.account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(mutation.account_id))?;

        let account = match &mutation.change {
            AccountChange::Renew {
                payment,
                credits,
                tier,
                renewal_at,
                status,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO billing_payments (
                        id,
                        external_id,
                        account_id,
                        customer_id,
                        product_id,
                        amount_cents,
                        currency
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(&payment.external_id)
                .bind(mutation.account_id)
                .bind(&payment.customer_id)
                .bind(&payment.product_id)
                .bind(payment.amount_cents)
                .bind(&payment.currency)
                .execute(&mut *tx)
                .await?;

                let account = sqlx::query_as::<_, CreditAccount>(
                    r#"
                    UPDATE credit_accounts
                    SET balance = $2, tier = $3, status = $4, renewal_at = $5, updated_at = NOW()
                    WHERE account_id = $1
                    RETURNING *
                    "#,
                )
                .bind(mutation.account_id)
                .bind(*credits)
                .bind(tier)
                .bind(status.as_str())
                .bind(*renewal_at)
                .fetch_one(&mut *tx)
                .await?;

                insert_transaction(
                    &mut tx,
                    NewTransaction {
                        account_id: mutation.account_id,
                        delta: credits - current.balance,
                        balance_after: *credits,
                        reason: TransactionReason::MonthlyRefill,
                        related_id: Some(&payment.external_id),
                    },
                )
                .await?;
                account
            }
            AccountChange::Cancel => {
                sqlx::query_as::<_, CreditAccount>(
                    r#"
                    UPDATE credit_accounts
                    SET status = $2, updated_at = NOW()
                    WHERE account_id = $1
                    RETURNING *
                    "#,
                )
                .bind(mutation.account_id)
                .bind(AccountStatus::Canceled.as_str())
                .fetch_one(&mut *tx)
                .await?
            }
            AccountChange::Expire => {
                let account = sqlx::query_as::<_, CreditAccount>(
                    r#"
                    UPDATE credit_accounts
                    SET status = $2, balance = 0, updated_at = NOW()
                    WHERE account_id = $1
                    RETURNING *
                    "#,
                )
                .bind(mutation.account_id)
                .bind(AccountStatus::Expired.as_str())
                .fetch_one(&mut *tx)
                .await?;
                if current.balance != 0 {
                    insert_transaction(
                        &mut tx,
                        NewTransaction {
                            account_id: mutation.account_id,
                            delta: -current.balance,
                            balance_after: 0,
                            reason: TransactionReason::SubscriptionExpiry,
                            related_id: Some(&mutation.dedup_key),
                        },
                    )
                    .await?;
                }
                account
            }
        };

        tx.commit().await?;
        Ok(BillingApplyOutcome::Applied(account))
    }
}
