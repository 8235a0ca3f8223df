use std::sync::Arc;

use anyhow::Context;

use devpulse_api::app::{self, services};
use devpulse_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    devpulse_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(services::build_services(&config).await?);

    if let Err(e) = services.manager.initialize().await {
        tracing::error!(error = %e, "scheduler initialization failed; tenants can be started via the admin API");
    }
    let maintenance = services.spawn_maintenance();

    let app = app::build_app(services.clone(), &config.admin_token);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let report = services.manager.emergency_stop_all();
    tracing::info!(timers_stopped = report.timers_stopped, "polling halted");
    maintenance.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
