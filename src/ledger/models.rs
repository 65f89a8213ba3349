use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: ledger-account -> one balance per user
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CreditAccount {
    pub account_id: i32,
    pub balance: i64,
    pub tier: String,
    pub status: String,
    pub renewal_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// key: ledger-transaction -> append-only log entry
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub account_id: i32,
    pub delta: i64,
    pub balance_after: i64,
    pub reason: String,
    pub related_job_id: Option<String>,
    pub related_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionReason {
    GenerationCharge,
    MonthlyRefill,
    AdminAdjustment,
    SubscriptionExpiry,
}

impl TransactionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionReason::GenerationCharge => "generation-charge",
            TransactionReason::MonthlyRefill => "monthly-refill",
            TransactionReason::AdminAdjustment => "admin-adjustment",
            TransactionReason::SubscriptionExpiry => "subscription-expiry",
        }
    }

    /// Charges reference a job; every other change references a payment or admin action.
    pub fn references_job(&self) -> bool {
        matches!(self, TransactionReason::GenerationCharge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Free,
    Active,
    Trialing,
    Canceled,
    Expired,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Free => "free",
            AccountStatus::Active => "active",
            AccountStatus::Trialing => "trialing",
            AccountStatus::Canceled => "canceled",
            AccountStatus::Expired => "expired",
        }
    }
}

pub const DEFAULT_TIER: &str = "free";

/// Result of an atomic check-and-reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub reserved: bool,
    pub balance: i64,
}

/// key: ledger-billing-mutation -> one webhook event, applied in one transaction
#[derive(Debug, Clone)]
pub struct BillingMutation {
    pub dedup_key: String,
    pub event_type: String,
    pub account_id: i32,
    pub change: AccountChange,
}

#[derive(Debug, Clone)]
pub enum AccountChange {
    Renew {
        payment: PaymentRecord,
        credits: i64,
        tier: String,
        renewal_at: Option<DateTime<Utc>>,
        status: AccountStatus,
    },
    Cancel,
    Expire,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub external_id: String,
    pub account_id: i32,
    pub customer_id: Option<String>,
    pub product_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingApplyOutcome {
    Applied(CreditAccount),
    Duplicate,
}
