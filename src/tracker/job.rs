use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::catalog::ModelKind;
use crate::dispatch::{JobQueue, RemoteStatus, Submission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Queued,
    Generating,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut
        )
    }
}

/// Why a job ended in `failed` or `timed-out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum JobError {
    UnexpectedStatus { status: String },
    StatusUnavailable { message: String },
    ResultUnavailable { message: String },
    MissingArtifacts,
    WatchExpired { after_secs: u64 },
}

/// key: generation-job -> one in-flight unit of work, owned by its watcher
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub job_id: Uuid,
    pub account_id: i32,
    pub correlation_id: String,
    /// Set when the job was charged as part of a batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub model_id: String,
    pub backend_id: String,
    pub kind: ModelKind,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Vec<String>,
    pub error: Option<JobError>,
}

impl GenerationJob {
    pub fn from_submission(job_id: Uuid, account_id: i32, submission: &Submission) -> Self {
        Self {
            job_id,
            account_id,
            correlation_id: submission.correlation_id.clone(),
            batch_id: None,
            model_id: submission.variant.model_id.clone(),
            backend_id: submission.variant.backend_id.clone(),
            kind: submission.variant.kind,
            state: JobState::Queued,
            started_at: Utc::now(),
            finished_at: None,
            result: Vec::new(),
            error: None,
        }
    }

    pub fn in_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Applies one poll outcome. Returns whether anything observable changed.
    pub fn advance(&mut self, outcome: PollOutcome) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        match outcome {
            PollOutcome::Pending(state) => {
                let changed = self.state != state;
                self.state = state;
                changed
            }
            PollOutcome::Completed(urls) => {
                self.state = JobState::Completed;
                self.result = urls;
                self.finished_at = Some(Utc::now());
                true
            }
            PollOutcome::Failed(error) => {
                self.state = JobState::Failed;
                self.error = Some(error);
                self.finished_at = Some(Utc::now());
                true
            }
        }
    }

    /// Forced transition once the watch ceiling passes, whatever the remote says.
    pub fn expire(&mut self, after_secs: u64) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = JobState::TimedOut;
        self.error = Some(JobError::WatchExpired { after_secs });
        self.finished_at = Some(Utc::now());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending(JobState),
    Completed(Vec<String>),
    Failed(JobError),
}

/// One status query, plus the result fetch when the queue reports completion.
pub async fn poll_once(queue: &dyn JobQueue, backend_id: &str, correlation_id: &str) -> PollOutcome {
    let status = match queue.status(backend_id, correlation_id).await {
        Ok(status) => status,
        Err(err) => {
            return PollOutcome::Failed(JobError::StatusUnavailable {
                message: err.to_string(),
            })
        }
    };

    match status {
        RemoteStatus::InQueue => PollOutcome::Pending(JobState::Queued),
        RemoteStatus::InProgress => PollOutcome::Pending(JobState::Generating),
        RemoteStatus::Other(status) => PollOutcome::Failed(JobError::UnexpectedStatus { status }),
        RemoteStatus::Completed => match queue.result(backend_id, correlation_id).await {
            Ok(payload) => match artifact_urls(&payload) {
                Some(urls) => PollOutcome::Completed(urls),
                None => PollOutcome::Failed(JobError::MissingArtifacts),
            },
            Err(err) => PollOutcome::Failed(JobError::ResultUnavailable {
                message: err.to_string(),
            }),
        },
    }
}

/// Accepts both `{ images: [{ url }] }` and `{ image: { url } }`.
pub fn artifact_urls(payload: &Value) -> Option<Vec<String>> {
    let urls: Vec<String> = if let Some(images) = payload.get("images").and_then(Value::as_array) {
        images
            .iter()
            .filter_map(|image| image.get("url").and_then(Value::as_str))
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    } else if let Some(url) = payload
        .get("image")
        .and_then(|image| image.get("url"))
        .and_then(Value::as_str)
    {
        vec![url.to_string()]
    } else {
        Vec::new()
    };

    if urls.is_empty() || urls.iter().any(|url| url.is_empty()) {
        None
    } else {
        Some(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolvedVariant;
    use serde_json::json;

    fn job() -> GenerationJob {
        let submission = Submission {
            correlation_id: "req-1".to_string(),
            variant: ResolvedVariant {
                model_id: "flux-dev".to_string(),
                backend_id: "fal-ai/flux/dev".to_string(),
                kind: ModelKind::TextToImage,
                credits_per_unit: 2,
                supports_image_array: false,
            },
        };
        GenerationJob::from_submission(Uuid::new_v4(), 1, &submission)
    }

    #[test]
    fn both_result_shapes_are_accepted() {
        assert_eq!(
            artifact_urls(&json!({ "images": [{ "url": "a" }, { "url": "b", "width": 8 }] })),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            artifact_urls(&json!({ "image": { "url": "solo" } })),
            Some(vec!["solo".to_string()])
        );
    }

    #[test]
    fn missing_urls_are_not_a_completion() {
        assert_eq!(artifact_urls(&json!({ "images": [] })), None);
        assert_eq!(artifact_urls(&json!({ "images": [{ "file": "x" }] })), None);
        assert_eq!(artifact_urls(&json!({ "seed": 4 })), None);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut job = job();
        assert!(job.advance(PollOutcome::Pending(JobState::Generating)));
        assert!(!job.advance(PollOutcome::Pending(JobState::Generating)));
        assert!(job.advance(PollOutcome::Completed(vec!["a".to_string()])));
        assert!(!job.expire(120));
        assert!(!job.advance(PollOutcome::Failed(JobError::MissingArtifacts)));
        assert_eq!(job.state, JobState::Completed);
        assert!(job.error.is_none());
    }

    #[test]
    fn expiry_records_structured_error() {
        let mut job = job();
        assert!(job.expire(120));
        assert_eq!(job.state, JobState::TimedOut);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["state"], "timed-out");
        assert_eq!(value["error"]["code"], "watch-expired");
        assert_eq!(value["error"]["after_secs"], 120);
    }
}
