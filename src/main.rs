use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use generation_gateway::billing::{BillingWebhookProcessor, PlanCatalog};
use generation_gateway::catalog::ModelCatalog;
use generation_gateway::dispatch::{Dispatcher, HttpJobQueue, JobQueue, PayloadRules};
use generation_gateway::generation::GenerationService;
use generation_gateway::ledger::{LedgerService, PgLedgerStore};
use generation_gateway::tracker::{JobTracker, TrackerSettings};
use generation_gateway::{app, config, AppComponents};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await
        .context("failed to connect to the ledger database")?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error).context("database migrations failed");
        }
    }

    let catalog = Arc::new(ModelCatalog::standard());
    let plans = match config::BILLING_PLAN_CATALOG.as_deref() {
        Some(raw) => PlanCatalog::from_json(raw).context("invalid BILLING_PLAN_CATALOG")?,
        None => PlanCatalog::standard(),
    };
    if config::BILLING_WEBHOOK_SECRET.is_none() {
        tracing::warn!("BILLING_WEBHOOK_SECRET is unset; billing webhooks will be rejected");
    }

    let ledger = LedgerService::new(
        Arc::new(PgLedgerStore::new(pool.clone())),
        *config::SIGNUP_CREDIT_BALANCE,
        *config::BILLING_TX_TIMEOUT,
    );
    let queue: Arc<dyn JobQueue> = Arc::new(HttpJobQueue::new(
        config::QUEUE_BASE_URL.as_str(),
        config::QUEUE_API_KEY.clone(),
    )?);
    let dispatcher = Dispatcher::new(
        queue.clone(),
        PayloadRules::standard(*config::AUTO_ASPECT_PIXEL_BUDGET),
    );
    let tracker = JobTracker::new(
        queue,
        TrackerSettings {
            poll_interval: *config::JOB_POLL_INTERVAL,
            timeout: *config::JOB_POLL_TIMEOUT,
            ..TrackerSettings::default()
        },
    );
    let webhooks = BillingWebhookProcessor::new(
        ledger.clone(),
        Arc::new(plans),
        config::BILLING_WEBHOOK_SECRET.clone(),
        config::BILLING_WEBHOOK_HMAC_SECRET.clone(),
    );
    let generation = GenerationService::new(catalog.clone(), ledger.clone(), dispatcher, tracker);
    tracing::info!(models = catalog.len(), "model catalog loaded");

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let router = Router::new()
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(app(AppComponents {
            generation,
            ledger,
            webhooks,
        }))
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .context("invalid bind address")?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
