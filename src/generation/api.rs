use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::{
    BatchGenerationRequest, BatchGenerationResponse, GenerationRequest, GenerationService,
    SubmitGenerationRequest, SubmitGenerationResponse,
};
use crate::catalog::ModelDescriptor;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::tracker::GenerationJob;

/// key: generation-api -> rest endpoints
pub async fn submit_generation(
    Extension(service): Extension<GenerationService>,
    AuthUser { account_id, .. }: AuthUser,
    Json(payload): Json<SubmitGenerationRequest>,
) -> AppResult<(StatusCode, Json<SubmitGenerationResponse>)> {
    let request = GenerationRequest {
        account_id,
        prompt: payload.prompt,
        images: payload.images,
        aspect_ratio: payload.aspect_ratio,
        unit_count: payload.unit_count,
    };
    let ticket = service.generate(&payload.model_id, request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitGenerationResponse {
            job_id: ticket.job_id,
            correlation_id: ticket.submission.correlation_id,
            resolved_backend_id: ticket.submission.variant.backend_id,
            credits_charged: ticket.credits_charged,
            remaining_credits: ticket.remaining_credits,
        }),
    ))
}

pub async fn submit_batch(
    Extension(service): Extension<GenerationService>,
    AuthUser { account_id, .. }: AuthUser,
    Json(payload): Json<BatchGenerationRequest>,
) -> AppResult<(StatusCode, Json<BatchGenerationResponse>)> {
    let request = GenerationRequest {
        account_id,
        prompt: payload.prompt,
        images: payload.images,
        aspect_ratio: payload.aspect_ratio,
        unit_count: 1,
    };
    let response = service.generate_batch(&payload.model_ids, request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Returns the job snapshot. A terminal snapshot is handed out once and the
/// job is then forgotten.
pub async fn get_generation(
    Extension(service): Extension<GenerationService>,
    AuthUser { account_id, .. }: AuthUser,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<GenerationJob>> {
    let tracker = service.tracker();
    let job = tracker.snapshot(job_id).ok_or(AppError::NotFound)?;
    if job.account_id != account_id {
        return Err(AppError::NotFound);
    }
    if job.state.is_terminal() {
        tracker.release(job_id);
    }
    Ok(Json(job))
}

pub async fn cancel_generation(
    Extension(service): Extension<GenerationService>,
    AuthUser { account_id, .. }: AuthUser,
    Path(job_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let tracker = service.tracker();
    let owned = tracker
        .snapshot(job_id)
        .map(|job| job.account_id == account_id)
        .unwrap_or(false);
    if !owned || !tracker.stop(job_id) {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_models(
    Extension(service): Extension<GenerationService>,
) -> Json<Vec<ModelDescriptor>> {
    Json(service.catalog().descriptors().to_vec())
}
