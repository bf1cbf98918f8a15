use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tourledger::catalog::InMemoryCatalog;
use tourledger::clock::SystemClock;
use tourledger::config::Config;
use tourledger::engine::Engine;
use tourledger::orchestrator::Orchestrator;
use tourledger::server::{self, Handler};
use tourledger::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tourledger::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let catalog = Arc::new(match &config.catalog {
        Some(path) => InMemoryCatalog::load_json(path)?,
        None => {
            tracing::warn!("TOURLEDGER_CATALOG not set, starting with an empty catalog");
            InMemoryCatalog::new()
        }
    });

    let engine = Arc::new(Engine::new(config.wal_path())?);
    let orchestrator = Arc::new(
        Orchestrator::new(
            catalog.clone(),
            catalog.clone(),
            engine.clone(),
            Arc::new(SystemClock),
            config.retry_policy(),
        )
        .await?,
    );

    tokio::spawn(sweeper::run_completer(
        orchestrator.clone(),
        engine.clone(),
        Duration::from_secs(3600),
    ));
    tokio::spawn(sweeper::run_reconciler(engine.clone(), Duration::from_secs(300)));
    tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
    ));

    let handler = Handler::new(orchestrator, engine.clone());
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("tourledger listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  catalog: {} resources, {} requesters",
        catalog.resource_count(),
        catalog.requester_count()
    );
    info!("  resources with bookings: {}", engine.resource_count());
    info!("  max_connections: {}", config.max_connections);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let still_open = server::serve(
        listener,
        handler,
        config.max_connections,
        Duration::from_secs(10),
        shutdown_signal(),
    )
    .await;
    if still_open > 0 {
        tracing::warn!("drain timeout, {still_open} connections still open");
    }

    info!("tourledger stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received, stopping accept loop");
}
