use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transient per-call generation input. Never persisted.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub account_id: i32,
    pub prompt: Option<String>,
    pub images: Vec<ImageReference>,
    pub aspect_ratio: String,
    pub unit_count: u32,
}

impl GenerationRequest {
    pub fn has_prompt(&self) -> bool {
        self.prompt
            .as_deref()
            .map(|prompt| !prompt.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn prompt_text(&self) -> Option<&str> {
        self.prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
    }

    /// Dimensions of the first reference image, when the uploader supplied them.
    pub fn reference_dimensions(&self) -> Option<(u32, u32)> {
        let first = self.images.first()?;
        match (first.width, first.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some((width, height)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl ImageReference {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width: None,
            height: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// key: generation-api -> single submission body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitGenerationRequest {
    pub model_id: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_unit_count")]
    pub unit_count: u32,
    #[serde(default)]
    pub images: Vec<ImageReference>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitGenerationResponse {
    pub job_id: Uuid,
    pub correlation_id: String,
    pub resolved_backend_id: String,
    pub credits_charged: i64,
    pub remaining_credits: i64,
}

/// key: generation-api -> comparison fan-out body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGenerationRequest {
    pub model_ids: Vec<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default)]
    pub images: Vec<ImageReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchEntryStatus {
    Queued,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub status: BatchEntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn queued(model_id: String, job_id: Uuid, correlation_id: String) -> Self {
        Self {
            model_id,
            job_id: Some(job_id),
            correlation_id: Some(correlation_id),
            status: BatchEntryStatus::Queued,
            error: None,
        }
    }

    pub fn failed(model_id: String, error: impl Into<String>) -> Self {
        Self {
            model_id,
            job_id: None,
            correlation_id: None,
            status: BatchEntryStatus::Failed,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGenerationResponse {
    /// Id the batch charge is booked under; absent when nothing was charged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub results: Vec<BatchEntry>,
    pub credits_charged: i64,
    pub remaining_credits: i64,
}

fn default_aspect_ratio() -> String {
    "1:1".to_string()
}

fn default_unit_count() -> u32 {
    1
}
