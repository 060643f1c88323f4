//! Service wiring: in-memory by default, Postgres when the `postgres`
//! feature is enabled and `DATABASE_URL` is set.

use std::sync::Arc;

use pixforge_core::{Clock, SystemClock};
use pixforge_credits::TierTable;
use pixforge_events::ProgressNotifier;
use pixforge_infra::account_store::{AccountStore, InMemoryAccountStore};
use pixforge_infra::job_store::{InMemoryJobStore, JobStore};
use pixforge_infra::provider::{LoopbackProvider, ProcessingProvider};
use pixforge_infra::{CreditLedger, LedgerConfig, OrchestratorConfig, OrchestratorParts, PipelineOrchestrator};
use pixforge_jobs::WorkflowRegistry;

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("database connection failed: {0}")]
    Database(String),
}

#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: PipelineOrchestrator,
    pub ledger: Arc<CreditLedger>,
    pub notifier: Arc<ProgressNotifier>,
}

impl AppServices {
    /// Wire the orchestrator over the given stores and provider.
    pub fn assemble(
        accounts: Arc<dyn AccountStore>,
        jobs: Arc<dyn JobStore>,
        provider: Arc<dyn ProcessingProvider>,
        ledger_config: LedgerConfig,
        config: OrchestratorConfig,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier = Arc::new(ProgressNotifier::new());
        let ledger = Arc::new(CreditLedger::new(accounts, TierTable::default(), clock.clone(), ledger_config));

        let orchestrator = PipelineOrchestrator::new(
            OrchestratorParts {
                ledger: ledger.clone(),
                jobs,
                provider,
                notifier: notifier.clone(),
                registry: WorkflowRegistry::standard(),
                clock,
            },
            config,
        );

        Self {
            orchestrator,
            ledger,
            notifier,
        }
    }

    /// In-memory stores (dev/test).
    pub fn in_memory(provider: Arc<dyn ProcessingProvider>, config: OrchestratorConfig) -> Self {
        Self::assemble(
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryJobStore::new()),
            provider,
            LedgerConfig::default(),
            config,
        )
    }
}

/// Build services from the environment.
pub async fn build_services() -> Result<AppServices, ServicesError> {
    let provider: Arc<dyn ProcessingProvider> = Arc::new(LoopbackProvider::new());

    #[cfg(feature = "postgres")]
    {
        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            use pixforge_infra::account_store::PostgresAccountStore;
            use pixforge_infra::job_store::PostgresJobStore;

            let pool = sqlx::PgPool::connect(&database_url)
                .await
                .map_err(|e| ServicesError::Database(e.to_string()))?;
            tracing::info!("using Postgres stores");
            return Ok(AppServices::assemble(
                Arc::new(PostgresAccountStore::new(pool.clone())),
                Arc::new(PostgresJobStore::new(pool)),
                provider,
                LedgerConfig::from_env(),
                OrchestratorConfig::from_env(),
            ));
        }
    }

    tracing::info!("using in-memory stores");
    Ok(AppServices::assemble(
        Arc::new(InMemoryAccountStore::new()),
        Arc::new(InMemoryJobStore::new()),
        provider,
        LedgerConfig::from_env(),
        OrchestratorConfig::from_env(),
    ))
}
