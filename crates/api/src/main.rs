use std::time::Duration;

use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pixforge_observability::init();

    let services = pixforge_api::app::services::build_services()
        .await
        .context("failed to build services")?;
    let sweeper = services.orchestrator.spawn_expiry_sweeper();
    let app = pixforge_api::app::build_app(services.clone());

    let bind = std::env::var("PIXFORGE_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    // Cancelled pipelines refund at their next step boundary.
    let flagged = services.orchestrator.cancel_all();
    tracing::info!(flagged, "shutting down; cancelling running pipelines");
    for _ in 0..100 {
        if services.orchestrator.running_jobs() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    sweeper.shutdown().await;
    Ok(())
}
