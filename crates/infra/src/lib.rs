//! Infrastructure layer: persistence, the credit ledger service, the
//! processing-provider boundary and the pipeline orchestrator.

pub mod account_store;
pub mod config;
pub mod job_store;
pub mod ledger;
pub mod orchestrator;
pub mod provider;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod integration_tests;

pub use config::{LedgerConfig, OrchestratorConfig};
pub use ledger::{BillingEvent, CreditLedger, LedgerError};
pub use orchestrator::{
    CancelFlag, CancelOutcome, OrchestratorError, OrchestratorParts, PipelineOrchestrator, SweeperHandle,
    SweeperStats,
};
