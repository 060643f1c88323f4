//! Boundary to the external processing provider (the AI models).
//!
//! The orchestrator only sees [`ProcessingProvider::invoke`]; calls are
//! treated as slow, fallible and not idempotent.

use std::sync::Arc;

use pixforge_jobs::{OutputRef, StepRequest};

mod backoff;
mod loopback;
mod polling;

pub use backoff::{Backoff, BackoffStrategy};
pub use loopback::LoopbackProvider;
pub use polling::{PollingProvider, PredictionBackend, PredictionId, PredictionState};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider refused the request (bad input, policy).
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The provider accepted the work and reported failure.
    #[error("processing failed: {0}")]
    Failed(String),
    /// The attempt ceiling was reached before a terminal state.
    #[error("timed out after {attempts} polling attempts")]
    TimedOut { attempts: u32 },
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait::async_trait]
pub trait ProcessingProvider: Send + Sync {
    /// Run one step to completion.
    async fn invoke(&self, request: &StepRequest) -> Result<OutputRef, ProviderError>;
}

#[async_trait::async_trait]
impl<P> ProcessingProvider for Arc<P>
where
    P: ProcessingProvider + ?Sized,
{
    async fn invoke(&self, request: &StepRequest) -> Result<OutputRef, ProviderError> {
        (**self).invoke(request).await
    }
}
