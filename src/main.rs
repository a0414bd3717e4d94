use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fleet_dispatch::audit::LogAudit;
use fleet_dispatch::config::Config;
use fleet_dispatch::engine::scheduler;
use fleet_dispatch::error::DispatchError;
use fleet_dispatch::geo::HaversineRouter;
use fleet_dispatch::notify::LogNotifier;
use fleet_dispatch::service::DispatchService;
use fleet_dispatch::state::AppState;
use fleet_dispatch::wallet::InMemoryLedger;

#[tokio::main]
async fn main() -> Result<(), DispatchError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let state = Arc::new(AppState::new(config.event_buffer_size));
    state.seed_default_pricing();

    let service = Arc::new(DispatchService::new(
        state,
        Arc::new(HaversineRouter),
        Arc::new(LogNotifier),
        Arc::new(InMemoryLedger::new()),
        Arc::new(LogAudit),
        config.timeouts,
    ));

    tokio::spawn(scheduler::run_sweeper(service.clone(), config.sweep_interval));

    tracing::info!("dispatch core started");

    shutdown_signal().await;
    tracing::info!("shutting down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
