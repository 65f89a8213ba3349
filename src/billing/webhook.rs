use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};

use super::plans::PlanCatalog;
use crate::ledger::{
    AccountChange, AccountStatus, BillingApplyOutcome, BillingMutation, LedgerError,
    LedgerService, PaymentRecord,
};

pub const SIGNATURE_HEADER: &str = "x-billing-signature";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook authentication failed")]
    Unauthenticated,
    #[error("billing webhook secret is not configured")]
    NotConfigured,
    #[error("malformed billing event: {0}")]
    Malformed(String),
    #[error("unknown billing product `{0}`")]
    UnknownProduct(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "eventType")]
    event_type: String,
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventObject {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    customer: Option<EventRef>,
    #[serde(default)]
    product: Option<EventProduct>,
    #[serde(default)]
    last_transaction: Option<EventTransaction>,
    #[serde(default)]
    current_period_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: EventMetadata,
}

#[derive(Debug, Deserialize)]
struct EventRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EventProduct {
    id: String,
    #[serde(default)]
    billing_type: Option<String>,
    #[serde(default)]
    price: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct EventTransaction {
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EventMetadata {
    #[serde(default, rename = "userId")]
    user_id: Option<Value>,
    #[serde(default, rename = "signToken")]
    sign_token: Option<String>,
}

/// What happened to an accepted delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied { account_id: i32, event_type: String },
    Duplicate { dedup_key: String },
    Ignored { event_type: String },
}

/// key: billing-webhook -> authenticate, map event, apply atomically
#[derive(Clone)]
pub struct BillingWebhookProcessor {
    ledger: LedgerService,
    plans: Arc<PlanCatalog>,
    sign_token: Option<String>,
    hmac_secret: Option<String>,
}

impl BillingWebhookProcessor {
    pub fn new(
        ledger: LedgerService,
        plans: Arc<PlanCatalog>,
        sign_token: Option<String>,
        hmac_secret: Option<String>,
    ) -> Self {
        Self {
            ledger,
            plans,
            sign_token,
            hmac_secret,
        }
    }

    pub async fn handle(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, WebhookError> {
        let expected_token = self
            .sign_token
            .as_deref()
            .ok_or(WebhookError::NotConfigured)?;
        if let Some(secret) = &self.hmac_secret {
            verify_signature(secret, signature, body)?;
        }

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|err| WebhookError::Malformed(err.to_string()))?;
        if !sign_token_matches(expected_token, event.object.metadata.sign_token.as_deref()) {
            warn!(event = %event.event_type, "billing webhook carried an invalid sign token");
            return Err(WebhookError::Unauthenticated);
        }

        let Some(mutation) = self.mutation_for(&event)? else {
            info!(event = %event.event_type, "billing event acknowledged without ledger effect");
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        };

        match self.ledger.apply_billing(&mutation).await? {
            BillingApplyOutcome::Applied(account) => {
                info!(
                    account_id = account.account_id,
                    event = %mutation.event_type,
                    balance = account.balance,
                    tier = %account.tier,
                    status = %account.status,
                    "billing event applied"
                );
                Ok(WebhookOutcome::Applied {
                    account_id: account.account_id,
                    event_type: mutation.event_type,
                })
            }
            BillingApplyOutcome::Duplicate => {
                info!(dedup_key = %mutation.dedup_key, "billing event replay ignored");
                Ok(WebhookOutcome::Duplicate {
                    dedup_key: mutation.dedup_key,
                })
            }
        }
    }

    fn mutation_for(&self, event: &WebhookEvent) -> Result<Option<BillingMutation>, WebhookError> {
        let one_time = event
            .object
            .product
            .as_ref()
            .and_then(|product| product.billing_type.as_deref())
            == Some("onetime");
        if one_time {
            return Ok(None);
        }

        let change = match event.event_type.as_str() {
            "subscription.paid" => self.renewal(event)?,
            "subscription.canceled" => AccountChange::Cancel,
            "subscription.expired" => AccountChange::Expire,
            _ => return Ok(None),
        };

        let account_id = account_id(event)?;
        Ok(Some(BillingMutation {
            dedup_key: dedup_key(event, account_id),
            event_type: event.event_type.clone(),
            account_id,
            change,
        }))
    }

    fn renewal(&self, event: &WebhookEvent) -> Result<AccountChange, WebhookError> {
        let object = &event.object;
        let product = object
            .product
            .as_ref()
            .ok_or_else(|| WebhookError::Malformed("object.product is required".into()))?;
        let entitlement = self
            .plans
            .entitlement(&product.id)
            .ok_or_else(|| WebhookError::UnknownProduct(product.id.clone()))?;
        let external_id = object
            .id
            .clone()
            .ok_or_else(|| WebhookError::Malformed("object.id is required".into()))?;

        let (amount_cents, currency) = match &object.last_transaction {
            Some(transaction) => (
                transaction.amount.or(product.price).unwrap_or(0),
                transaction.currency.clone(),
            ),
            None => (product.price.unwrap_or(0), None),
        };
        let status = if object.status.as_deref() == Some("trialing") {
            AccountStatus::Trialing
        } else {
            AccountStatus::Active
        };

        Ok(AccountChange::Renew {
            payment: PaymentRecord {
                external_id,
                account_id: account_id(event)?,
                customer_id: object.customer.as_ref().map(|customer| customer.id.clone()),
                product_id: product.id.clone(),
                amount_cents,
                currency: currency.unwrap_or_else(|| "USD".to_string()),
            },
            credits: entitlement.credits,
            tier: entitlement.plan,
            renewal_at: object.current_period_end_date,
            status,
        })
    }
}

fn verify_signature(secret: &str, signature: Option<&str>, body: &[u8]) -> Result<(), WebhookError> {
    let provided = signature
        .map(|value| value.trim().trim_start_matches("sha256="))
        .and_then(|value| hex::decode(value).ok())
        .ok_or(WebhookError::Unauthenticated)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::NotConfigured)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| WebhookError::Unauthenticated)
}

fn sign_token_matches(expected: &str, provided: Option<&str>) -> bool {
    provided
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false)
}

fn account_id(event: &WebhookEvent) -> Result<i32, WebhookError> {
    let raw = event
        .object
        .metadata
        .user_id
        .as_ref()
        .ok_or_else(|| WebhookError::Malformed("metadata.userId is required".into()))?;
    let parsed = match raw {
        Value::Number(number) => number.as_i64().and_then(|id| i32::try_from(id).ok()),
        Value::String(text) => text.trim().parse::<i32>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| WebhookError::Malformed(format!("metadata.userId `{raw}` is not an account id")))
}

/// The provider's event id when present; otherwise the logical identity of
/// the event so a retried delivery of the same period collapses onto one key.
/// The account is part of that identity: `object.id` may be absent.
fn dedup_key(event: &WebhookEvent, account_id: i32) -> String {
    if let Some(id) = event.id.as_deref().filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    format!(
        "{}:{}:{}:{}",
        event.event_type,
        account_id,
        event.object.id.as_deref().unwrap_or_default(),
        event
            .object
            .current_period_end_date
            .map(|at| at.to_rfc3339())
            .unwrap_or_default()
    )
}
