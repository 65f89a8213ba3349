use axum::{
    routing::{get, post},
    Extension, Router,
};

use crate::billing::{self, BillingWebhookProcessor};
use crate::generation::{api as generation_api, GenerationService};
use crate::ledger::LedgerService;
use crate::webhooks;

pub const BANNER: &str = "Generation Gateway API";

/// Shared services attached to every request as extensions.
#[derive(Clone)]
pub struct AppComponents {
    pub generation: GenerationService,
    pub ledger: LedgerService,
    pub webhooks: BillingWebhookProcessor,
}

async fn root() -> &'static str {
    BANNER
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/models", get(generation_api::list_models))
        .route("/api/generations", post(generation_api::submit_generation))
        .route("/api/generations/batch", post(generation_api::submit_batch))
        .route(
            "/api/generations/:job_id",
            get(generation_api::get_generation).delete(generation_api::cancel_generation),
        )
        .route("/api/credits", get(billing::get_credits))
        .route("/api/credits/transactions", get(billing::list_transactions))
        .route("/api/webhooks/billing", post(webhooks::billing_webhook))
}

pub fn app(components: AppComponents) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(components.generation))
        .layer(Extension(components.ledger))
        .layer(Extension(components.webhooks))
}
