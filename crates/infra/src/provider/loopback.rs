use std::time::Duration;

use pixforge_jobs::{OutputRef, StepRequest};

use super::{ProcessingProvider, ProviderError};

/// Deterministic provider for local runs: each output ref is derived from the
/// step's input and kind.
#[derive(Debug, Clone, Default)]
pub struct LoopbackProvider {
    latency: Duration,
}

impl LoopbackProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait::async_trait]
impl ProcessingProvider for LoopbackProvider {
    async fn invoke(&self, request: &StepRequest) -> Result<OutputRef, ProviderError> {
        if request.input_ref.is_empty() {
            return Err(ProviderError::Rejected("empty input reference".to_string()));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(OutputRef::new(format!(
            "{}#{}",
            request.input_ref,
            request.kind.as_str()
        )))
    }
}
