use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("queue rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("queue response missing `{0}`")]
    MalformedResponse(&'static str),
}

/// Remote job status as reported by the queue's status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    InQueue,
    InProgress,
    Completed,
    Other(String),
}

impl RemoteStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "IN_QUEUE" => RemoteStatus::InQueue,
            "IN_PROGRESS" => RemoteStatus::InProgress,
            "COMPLETED" => RemoteStatus::Completed,
            other => RemoteStatus::Other(other.to_string()),
        }
    }
}

/// key: job-queue -> external asynchronous queue we only submit to and poll
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submits the payload and returns the queue's correlation id.
    async fn submit(&self, backend_id: &str, payload: &Value) -> Result<String, QueueError>;

    async fn status(&self, backend_id: &str, correlation_id: &str)
        -> Result<RemoteStatus, QueueError>;

    async fn result(&self, backend_id: &str, correlation_id: &str) -> Result<Value, QueueError>;
}

#[derive(Clone)]
pub struct HttpJobQueue {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
}

impl HttpJobQueue {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let base_url = base_url.into();
        Url::parse(&base_url).with_context(|| format!("invalid job queue url `{base_url}`"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build job queue client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(key) = &self.api_key {
            request.header(reqwest::header::AUTHORIZATION, format!("Key {key}"))
        } else {
            request
        }
    }

    /// Status and result routes live under the application root, which is the
    /// first two segments of the backend id (`owner/app`).
    fn request_path(backend_id: &str, correlation_id: &str) -> String {
        let app_root = backend_id
            .trim_matches('/')
            .split('/')
            .take(2)
            .collect::<Vec<_>>()
            .join("/");
        format!("{app_root}/requests/{correlation_id}")
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, QueueError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(QueueError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl JobQueue for HttpJobQueue {
    async fn submit(&self, backend_id: &str, payload: &Value) -> Result<String, QueueError> {
        let response = self
            .auth(self.client.post(self.endpoint(backend_id)))
            .json(payload)
            .send()
            .await?;
        let body: SubmitResponse = Self::checked(response).await?.json().await?;
        body.request_id
            .filter(|id| !id.is_empty())
            .ok_or(QueueError::MalformedResponse("request_id"))
    }

    async fn status(
        &self,
        backend_id: &str,
        correlation_id: &str,
    ) -> Result<RemoteStatus, QueueError> {
        let path = format!("{}/status", Self::request_path(backend_id, correlation_id));
        let response = self
            .auth(self.client.get(self.endpoint(&path)))
            .send()
            .await?;
        let body: StatusResponse = Self::checked(response).await?.json().await?;
        body.status
            .map(|status| RemoteStatus::parse(&status))
            .ok_or(QueueError::MalformedResponse("status"))
    }

    async fn result(&self, backend_id: &str, correlation_id: &str) -> Result<Value, QueueError> {
        let path = Self::request_path(backend_id, correlation_id);
        let response = self
            .auth(self.client.get(self.endpoint(&path)))
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }
}

pub mod testing {
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Queue double whose statuses are scripted per correlation id. The last
    /// scripted status repeats; unscripted jobs report `IN_PROGRESS` forever.
    #[derive(Default)]
    pub struct ScriptedJobQueue {
        next_id: AtomicUsize,
        failing_backends: Mutex<HashSet<String>>,
        submissions: Mutex<Vec<(String, Value)>>,
        statuses: Mutex<HashMap<String, VecDeque<RemoteStatus>>>,
        results: Mutex<HashMap<String, Value>>,
        polls: Mutex<HashMap<String, usize>>,
    }

    impl ScriptedJobQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_backend(&self, backend_id: &str) {
            lock(&self.failing_backends).insert(backend_id.to_string());
        }

        pub fn script(&self, correlation_id: &str, statuses: Vec<RemoteStatus>) {
            lock(&self.statuses).insert(correlation_id.to_string(), statuses.into());
        }

        pub fn set_result(&self, correlation_id: &str, result: Value) {
            lock(&self.results).insert(correlation_id.to_string(), result);
        }

        pub fn submissions(&self) -> Vec<(String, Value)> {
            lock(&self.submissions).clone()
        }

        pub fn status_polls(&self, correlation_id: &str) -> usize {
            lock(&self.polls).get(correlation_id).copied().unwrap_or(0)
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[async_trait]
    impl JobQueue for ScriptedJobQueue {
        async fn submit(&self, backend_id: &str, payload: &Value) -> Result<String, QueueError> {
            if lock(&self.failing_backends).contains(backend_id) {
                return Err(QueueError::Rejected {
                    status: 503,
                    body: format!("{backend_id} unavailable"),
                });
            }
            lock(&self.submissions).push((backend_id.to_string(), payload.clone()));
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("req-{id}"))
        }

        async fn status(
            &self,
            _backend_id: &str,
            correlation_id: &str,
        ) -> Result<RemoteStatus, QueueError> {
            *lock(&self.polls)
                .entry(correlation_id.to_string())
                .or_insert(0) += 1;
            let mut statuses = lock(&self.statuses);
            let Some(script) = statuses.get_mut(correlation_id) else {
                return Ok(RemoteStatus::InProgress);
            };
            let status = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            Ok(status.unwrap_or(RemoteStatus::InProgress))
        }

        async fn result(
            &self,
            _backend_id: &str,
            correlation_id: &str,
        ) -> Result<Value, QueueError> {
            lock(&self.results)
                .get(correlation_id)
                .cloned()
                .ok_or(QueueError::MalformedResponse("result"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn request_path_uses_application_root() {
        assert_eq!(
            HttpJobQueue::request_path("fal-ai/flux/dev/image-to-image", "abc"),
            "fal-ai/flux/requests/abc"
        );
        assert_eq!(
            HttpJobQueue::request_path("fal-ai/nano-banana", "abc"),
            "fal-ai/nano-banana/requests/abc"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpJobQueue::new("not a url", None).is_err());
    }

    #[test]
    fn unknown_statuses_are_preserved() {
        assert_eq!(RemoteStatus::parse("IN_QUEUE"), RemoteStatus::InQueue);
        assert_eq!(
            RemoteStatus::parse("CANCELLED"),
            RemoteStatus::Other("CANCELLED".to_string())
        );
    }

    #[tokio::test]
    async fn http_queue_covers_submit_status_and_result() {
        let server = MockServer::start_async().await;

        let submit_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/fal-ai/flux/dev")
                .header("authorization", "Key secret-key")
                .json_body(json!({ "prompt": "a fox" }));
            then.status(200).json_body(json!({ "request_id": "req-42" }));
        });
        let status_mock = server.mock(|when, then| {
            when.method(GET).path("/fal-ai/flux/requests/req-42/status");
            then.status(200).json_body(json!({ "status": "COMPLETED" }));
        });
        let result_mock = server.mock(|when, then| {
            when.method(GET).path("/fal-ai/flux/requests/req-42");
            then.status(200)
                .json_body(json!({ "images": [{ "url": "https://cdn.test/out.png" }] }));
        });

        let queue = HttpJobQueue::new(server.base_url(), Some("secret-key".to_string())).unwrap();
        let correlation_id = queue
            .submit("fal-ai/flux/dev", &json!({ "prompt": "a fox" }))
            .await
            .unwrap();
        assert_eq!(correlation_id, "req-42");
        assert_eq!(
            queue.status("fal-ai/flux/dev", &correlation_id).await.unwrap(),
            RemoteStatus::Completed
        );
        let result = queue.result("fal-ai/flux/dev", &correlation_id).await.unwrap();
        assert_eq!(result["images"][0]["url"], "https://cdn.test/out.png");

        submit_mock.assert();
        status_mock.assert();
        result_mock.assert();
    }

    #[tokio::test]
    async fn rejected_submission_surfaces_status_and_body() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/fal-ai/ideogram/v3");
            then.status(422).body("prompt too long");
        });

        let queue = HttpJobQueue::new(server.base_url(), None).unwrap();
        let err = queue
            .submit("fal-ai/ideogram/v3", &json!({ "prompt": "x" }))
            .await
            .unwrap_err();
        match err {
            QueueError::Rejected { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "prompt too long");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
