use anyhow::Result;
use energy_dispatch::{
    api,
    config::Config,
    optimizer::SolverAdapter,
    repo::{InMemoryAssetRegistry, InMemoryJobStore, Portfolio, ProfileForecastService},
    telemetry, Orchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::load()?;
    let portfolio = Portfolio::load(&cfg.portfolio.path)?;
    info!(
        path = %cfg.portfolio.path.display(),
        assets = portfolio.assets.len(),
        "portfolio loaded"
    );

    let registry = Arc::new(InMemoryAssetRegistry::new(portfolio.assets));
    let forecasts = Arc::new(ProfileForecastService::new(portfolio.forecast)?);
    let store = Arc::new(InMemoryJobStore::new());
    let adapter = SolverAdapter::with_default_backends(&cfg.solver.fallback_order);
    if adapter.kinds().is_empty() {
        anyhow::bail!("solver.fallback_order must name at least one backend");
    }

    let orchestrator = Orchestrator::new(cfg.clone(), adapter, registry, forecasts, store);
    let app = api::router(api::AppState::new(orchestrator.clone()), &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("binding to 0.0.0.0, the job API is reachable from the network");
    }
    info!(%addr, "starting energy dispatch engine");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    orchestrator.shutdown();
    warn!("shutdown complete");
    Ok(())
}
