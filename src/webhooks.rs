use axum::{
    body::Bytes,
    extract::Extension,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::billing::{BillingWebhookProcessor, SIGNATURE_HEADER};
use crate::error::AppResult;

/// key: webhooks-billing -> provider entrypoint
///
/// Any non-2xx answer asks the provider to redeliver; nothing is applied
/// before the response is decided.
pub async fn billing_webhook(
    Extension(processor): Extension<BillingWebhookProcessor>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    processor.handle(signature, &body).await?;
    Ok(Json(json!({ "success": true })))
}
