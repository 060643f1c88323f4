//! Adapter for providers that run predictions asynchronously: submit, then
//! poll until a terminal state or the attempt ceiling.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pixforge_jobs::{OutputRef, StepRequest};

use super::{Backoff, ProcessingProvider, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PredictionState {
    Starting,
    Processing,
    Succeeded { output: OutputRef },
    Failed { error: String },
    Canceled,
}

/// Remote prediction API.
#[async_trait::async_trait]
pub trait PredictionBackend: Send + Sync {
    async fn submit(&self, request: &StepRequest) -> Result<PredictionId, ProviderError>;

    async fn poll(&self, id: &PredictionId) -> Result<PredictionState, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct PollingProvider<B> {
    backend: B,
    backoff: Backoff,
}

impl<B> PollingProvider<B> {
    pub fn new(backend: B, backoff: Backoff) -> Self {
        Self { backend, backoff }
    }
}

#[async_trait::async_trait]
impl<B: PredictionBackend> ProcessingProvider for PollingProvider<B> {
    async fn invoke(&self, request: &StepRequest) -> Result<OutputRef, ProviderError> {
        let id = self.backend.submit(request).await?;
        debug!(prediction = %id.0, step = request.kind.as_str(), "prediction submitted");

        let mut attempt = 0;
        while self.backoff.allows(attempt) {
            attempt += 1;
            match self.backend.poll(&id).await {
                Ok(PredictionState::Succeeded { output }) => return Ok(output),
                Ok(PredictionState::Failed { error }) => return Err(ProviderError::Failed(error)),
                Ok(PredictionState::Canceled) => {
                    return Err(ProviderError::Failed("prediction was canceled upstream".to_string()));
                }
                Ok(PredictionState::Starting | PredictionState::Processing) => {}
                // Transient: counts against the ceiling.
                Err(ProviderError::Transport(reason)) => {
                    warn!(prediction = %id.0, attempt, %reason, "poll failed; will retry");
                }
                Err(other) => return Err(other),
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
        }

        Err(ProviderError::TimedOut { attempts: attempt })
    }
}
