pub mod dimensions;
pub mod payload;
pub mod queue;

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::generation::GenerationRequest;
use crate::resolver::ResolvedVariant;

pub use dimensions::{dimensions_for, ImageSize};
pub use payload::PayloadRules;
pub use queue::{HttpJobQueue, JobQueue, QueueError, RemoteStatus};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("submission to `{backend_id}` failed: {source}")]
    Submission {
        backend_id: String,
        #[source]
        source: QueueError,
    },
}

/// Acknowledgement from the queue for one submitted unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub correlation_id: String,
    pub variant: ResolvedVariant,
}

/// key: job-dispatcher -> payload shaping + queue submission
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    rules: Arc<PayloadRules>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, rules: PayloadRules) -> Self {
        Self {
            queue,
            rules: Arc::new(rules),
        }
    }

    pub fn queue(&self) -> Arc<dyn JobQueue> {
        self.queue.clone()
    }

    /// Submits and returns as soon as the queue acknowledges; never waits for completion.
    pub async fn submit(
        &self,
        variant: &ResolvedVariant,
        request: &GenerationRequest,
    ) -> Result<Submission, DispatchError> {
        let payload = self.rules.build(variant, request);
        match self.queue.submit(&variant.backend_id, &payload).await {
            Ok(correlation_id) => {
                info!(
                    model_id = %variant.model_id,
                    backend_id = %variant.backend_id,
                    %correlation_id,
                    account_id = request.account_id,
                    "generation submitted"
                );
                Ok(Submission {
                    correlation_id,
                    variant: variant.clone(),
                })
            }
            Err(source) => {
                warn!(
                    model_id = %variant.model_id,
                    backend_id = %variant.backend_id,
                    error = %source,
                    "generation submission failed"
                );
                Err(DispatchError::Submission {
                    backend_id: variant.backend_id.clone(),
                    source,
                })
            }
        }
    }

    /// Submits every variant concurrently. Results keep input order and one
    /// failure never aborts its siblings.
    pub async fn submit_all(
        &self,
        variants: &[ResolvedVariant],
        request: &GenerationRequest,
    ) -> Vec<Result<Submission, DispatchError>> {
        join_all(variants.iter().map(|variant| self.submit(variant, request))).await
    }
}
