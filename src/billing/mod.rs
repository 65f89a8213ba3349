pub mod api;
pub mod plans;
pub mod webhook;

pub use api::{get_credits, list_transactions, CreditSummary};
pub use plans::{BillingPeriod, Entitlement, PlanCatalog, PlanCatalogError, PricingPlan, PlanProduct};
pub use webhook::{BillingWebhookProcessor, WebhookError, WebhookOutcome, SIGNATURE_HEADER};
