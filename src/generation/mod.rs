pub mod api;
pub mod models;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::ModelCatalog;
use crate::dispatch::{DispatchError, Dispatcher, Submission};
use crate::ledger::{LedgerError, LedgerService};
use crate::resolver::{self, ResolveError, ResolvedVariant};
use crate::tracker::JobTracker;

pub use models::{
    BatchEntry, BatchEntryStatus, BatchGenerationRequest, BatchGenerationResponse,
    GenerationRequest, ImageReference, SubmitGenerationRequest, SubmitGenerationResponse,
};

const MAX_UNIT_COUNT: u32 = 8;
const MAX_BATCH_MODELS: usize = 8;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("insufficient credits: {required} required, {current} available")]
    InsufficientCredits { required: i64, current: i64 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// A dispatched single generation.
#[derive(Debug, Clone)]
pub struct GenerationTicket {
    pub job_id: Uuid,
    pub submission: Submission,
    pub credits_charged: i64,
    pub remaining_credits: i64,
}

/// key: generation-service -> resolve, reserve, submit, track
#[derive(Clone)]
pub struct GenerationService {
    catalog: Arc<ModelCatalog>,
    ledger: LedgerService,
    dispatcher: Dispatcher,
    tracker: JobTracker,
}

impl GenerationService {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        ledger: LedgerService,
        dispatcher: Dispatcher,
        tracker: JobTracker,
    ) -> Self {
        Self {
            catalog,
            ledger,
            dispatcher,
            tracker,
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub async fn generate(
        &self,
        model_id: &str,
        request: GenerationRequest,
    ) -> Result<GenerationTicket, GenerationError> {
        validate(&request)?;
        let variant = resolver::resolve(&self.catalog, &request, model_id)?;
        let required = variant.credits_for(request.unit_count);

        let job_id = Uuid::new_v4();
        let remaining_credits = self
            .charge(request.account_id, required, &job_id.to_string())
            .await?;

        let submission = self.dispatcher.submit(&variant, &request).await?;
        self.tracker.track(job_id, request.account_id, &submission);
        Ok(GenerationTicket {
            job_id,
            submission,
            credits_charged: required,
            remaining_credits,
        })
    }

    /// Fans one prompt out to several models. The summed cost of every
    /// resolvable model is reserved up front and is not refunded when an
    /// individual submission fails.
    pub async fn generate_batch(
        &self,
        model_ids: &[String],
        request: GenerationRequest,
    ) -> Result<BatchGenerationResponse, GenerationError> {
        if model_ids.is_empty() {
            return Err(GenerationError::Validation(
                "at least one model id is required".into(),
            ));
        }
        if model_ids.len() > MAX_BATCH_MODELS {
            return Err(GenerationError::Validation(format!(
                "at most {MAX_BATCH_MODELS} models per batch"
            )));
        }
        validate(&request)?;

        let mut results: Vec<Option<BatchEntry>> = Vec::with_capacity(model_ids.len());
        let mut resolved: Vec<(usize, ResolvedVariant)> = Vec::new();
        for (position, model_id) in model_ids.iter().enumerate() {
            match resolver::resolve(&self.catalog, &request, model_id) {
                Ok(variant) => {
                    resolved.push((position, variant));
                    results.push(None);
                }
                Err(err) => {
                    warn!(%model_id, error = %err, "batch entry rejected before dispatch");
                    results.push(Some(BatchEntry::failed(model_id.clone(), err.to_string())));
                }
            }
        }

        if resolved.is_empty() {
            let results = results.into_iter().flatten().collect();
            let remaining_credits = self.ledger.ensure_account(request.account_id).await?.balance;
            return Ok(BatchGenerationResponse {
                batch_id: None,
                results,
                credits_charged: 0,
                remaining_credits,
            });
        }

        let required: i64 = resolved
            .iter()
            .map(|(_, variant)| variant.credits_for(request.unit_count))
            .sum();
        let batch_id = Uuid::new_v4();
        let remaining_credits = self
            .charge(request.account_id, required, &batch_id.to_string())
            .await?;

        let variants: Vec<ResolvedVariant> =
            resolved.iter().map(|(_, variant)| variant.clone()).collect();
        let outcomes = self.dispatcher.submit_all(&variants, &request).await;

        for ((position, variant), outcome) in resolved.into_iter().zip(outcomes) {
            let entry = match outcome {
                Ok(submission) => {
                    let job_id = Uuid::new_v4();
                    self.tracker
                        .track_in_batch(job_id, request.account_id, batch_id, &submission);
                    BatchEntry::queued(variant.model_id, job_id, submission.correlation_id)
                }
                Err(err) => BatchEntry::failed(variant.model_id, err.to_string()),
            };
            results[position] = Some(entry);
        }

        let results: Vec<BatchEntry> = results.into_iter().flatten().collect();
        info!(
            account_id = request.account_id,
            %batch_id,
            models = results.len(),
            queued = results
                .iter()
                .filter(|entry| entry.status == BatchEntryStatus::Queued)
                .count(),
            credits = required,
            "batch generation dispatched"
        );
        Ok(BatchGenerationResponse {
            batch_id: Some(batch_id),
            results,
            credits_charged: required,
            remaining_credits,
        })
    }

    async fn charge(
        &self,
        account_id: i32,
        required: i64,
        related_job_id: &str,
    ) -> Result<i64, GenerationError> {
        self.ledger.ensure_account(account_id).await?;
        let reservation = self
            .ledger
            .reserve(account_id, required, related_job_id)
            .await?;
        if !reservation.reserved {
            return Err(GenerationError::InsufficientCredits {
                required,
                current: reservation.balance,
            });
        }
        Ok(reservation.balance)
    }
}

fn validate(request: &GenerationRequest) -> Result<(), GenerationError> {
    if request.unit_count == 0 || request.unit_count > MAX_UNIT_COUNT {
        return Err(GenerationError::Validation(format!(
            "unitCount must be between 1 and {MAX_UNIT_COUNT}"
        )));
    }
    if !request.has_prompt() && request.images.is_empty() {
        return Err(GenerationError::Validation(
            "a prompt or at least one image is required".into(),
        ));
    }
    if request.images.iter().any(|image| image.url.trim().is_empty()) {
        return Err(GenerationError::Validation(
            "image references must carry a url".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::queue::testing::ScriptedJobQueue;
    use crate::dispatch::PayloadRules;
    use crate::ledger::testing::InMemoryLedgerStore;
    use crate::ledger::LedgerStore;
    use crate::tracker::TrackerSettings;
    use std::time::Duration;

    struct Harness {
        service: GenerationService,
        store: Arc<InMemoryLedgerStore>,
        queue: Arc<ScriptedJobQueue>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryLedgerStore::new());
        let queue = Arc::new(ScriptedJobQueue::new());
        let ledger = LedgerService::new(store.clone(), 10, Duration::from_secs(5));
        let dispatcher = Dispatcher::new(queue.clone(), PayloadRules::standard(1_048_576));
        let tracker = JobTracker::new(queue.clone(), TrackerSettings::default());
        Harness {
            service: GenerationService::new(
                Arc::new(ModelCatalog::standard()),
                ledger,
                dispatcher,
                tracker,
            ),
            store,
            queue,
        }
    }

    fn request(account_id: i32, prompt: &str, unit_count: u32) -> GenerationRequest {
        GenerationRequest {
            account_id,
            prompt: Some(prompt.to_string()),
            images: vec![],
            aspect_ratio: "1:1".to_string(),
            unit_count,
        }
    }

    #[tokio::test]
    async fn generate_charges_and_tracks() {
        let h = harness();
        let ticket = h
            .service
            .generate("flux-dev", request(1, "a lighthouse", 2))
            .await
            .unwrap();

        assert_eq!(ticket.credits_charged, 4);
        assert_eq!(ticket.remaining_credits, 6);
        assert_eq!(ticket.submission.variant.backend_id, "fal-ai/flux/dev");
        assert!(h.service.tracker().snapshot(ticket.job_id).is_some());

        let log = h.store.transactions(1, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].delta, -4);
        assert_eq!(
            log[0].related_job_id.as_deref(),
            Some(ticket.job_id.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn insufficient_credits_report_required_and_current() {
        let h = harness();
        h.store.open_account(2, 5).await.unwrap();

        // ideogram-v3 costs 3 per unit
        let err = h
            .service
            .generate("ideogram-v3", request(2, "poster", 4))
            .await
            .unwrap_err();
        match err {
            GenerationError::InsufficientCredits { required, current } => {
                assert_eq!(required, 12);
                assert_eq!(current, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.store.account(2).await.unwrap().unwrap().balance, 5);
        assert!(h.queue.submissions().is_empty());
    }

    #[tokio::test]
    async fn zero_cost_models_still_charge_one_credit() {
        let h = harness();
        let ticket = h
            .service
            .generate("sdxl-lightning", request(3, "sketch", 5))
            .await
            .unwrap();
        assert_eq!(ticket.credits_charged, 1);
        assert_eq!(ticket.remaining_credits, 9);
    }

    #[tokio::test]
    async fn incompatible_requests_have_no_effect() {
        let h = harness();
        let err = h
            .service
            .generate("background-removal", request(4, "no image here", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Resolve(ResolveError::IncompatibleModel(_))
        ));
        assert!(h.store.account(4).await.unwrap().is_none());
        assert!(h.queue.submissions().is_empty());
    }

    #[tokio::test]
    async fn validation_runs_before_resolution() {
        let h = harness();
        let err = h
            .service
            .generate("flux-dev", request(5, "x", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));

        let mut blank = request(5, "   ", 1);
        blank.prompt = Some("   ".into());
        assert!(matches!(
            h.service.generate("flux-dev", blank).await,
            Err(GenerationError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn batch_reports_every_model_independently() {
        let h = harness();
        h.store.open_account(6, 100).await.unwrap();
        h.queue.fail_backend("fal-ai/ideogram/v3");

        let model_ids = vec![
            "flux-schnell".to_string(),
            "ideogram-v3".to_string(),
            "nano-banana".to_string(),
        ];
        let response = h
            .service
            .generate_batch(&model_ids, request(6, "a city at dusk", 1))
            .await
            .unwrap();

        assert_eq!(response.results.len(), 3);
        let with_correlation = response
            .results
            .iter()
            .filter(|entry| entry.correlation_id.is_some())
            .count();
        assert_eq!(with_correlation, 2);
        assert_eq!(response.results[1].model_id, "ideogram-v3");
        assert_eq!(response.results[1].status, BatchEntryStatus::Failed);

        // 1 + 3 + 2, charged in full despite the failed submission
        assert_eq!(response.credits_charged, 6);
        assert_eq!(response.remaining_credits, 94);
        assert_eq!(h.service.tracker().len(), 2);

        // one charge row for the whole batch, traceable to each queued job
        let batch_id = response.batch_id.unwrap();
        let log = h.store.transactions(6, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].delta, -6);
        assert_eq!(log[0].related_job_id, Some(batch_id.to_string()));
        for entry in response.results.iter().filter(|entry| entry.job_id.is_some()) {
            let job = h.service.tracker().snapshot(entry.job_id.unwrap()).unwrap();
            assert_eq!(job.batch_id, Some(batch_id));
        }
    }

    #[tokio::test]
    async fn batch_skips_charging_unresolvable_models() {
        let h = harness();
        let model_ids = vec!["flux-schnell".to_string(), "no-such-model".to_string()];
        let response = h
            .service
            .generate_batch(&model_ids, request(7, "a dog", 1))
            .await
            .unwrap();

        assert_eq!(response.credits_charged, 1);
        assert_eq!(response.remaining_credits, 9);
        assert!(response.batch_id.is_some());
        assert_eq!(response.results[0].status, BatchEntryStatus::Queued);
        assert_eq!(response.results[1].status, BatchEntryStatus::Failed);
        assert!(response.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("no-such-model"));
    }

    #[tokio::test]
    async fn batch_insufficient_credits_dispatches_nothing() {
        let h = harness();
        h.store.open_account(8, 2).await.unwrap();
        let model_ids = vec!["flux-schnell".to_string(), "ideogram-v3".to_string()];
        let err = h
            .service
            .generate_batch(&model_ids, request(8, "a dog", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::InsufficientCredits {
                required: 4,
                current: 2
            }
        ));
        assert!(h.queue.submissions().is_empty());
    }
}
