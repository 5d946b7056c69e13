//! cobusd: cobus TCP broker daemon.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use cobus_broker::Server;
use cobus_core::config::BusConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config first so its log filter can apply when RUST_LOG is unset.
    let config_result = BusConfig::load();
    let config = config_result.as_ref().cloned().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = &config_result {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }
    if let Err(e) = BusConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.broker.listen_addr());
    tracing::info!(%addr, "cobusd starting");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Broker ───────────────────────────────────────────────────────────────
    let server = Server::bind(addr.as_str(), shutdown_tx.subscribe())
        .await
        .with_context(|| format!("failed to bind broker on {addr}"))?;
    let registry = server.registry();
    let mut server_task = tokio::spawn(server.run());

    let status_printer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        interval.tick().await;
        loop {
            interval.tick().await;
            tracing::info!(
                components = ?registry.registered_components(),
                connections = registry.connection_count(),
                listening = registry.listening_count(),
                "registry status"
            );
        }
    });

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();

    let shutting_down = tokio::select! {
        _ = shutdown_rx.recv() => true,
        r = &mut server_task => { tracing::error!("broker exited: {:?}", r); false }
        r = status_printer   => { tracing::error!("status printer exited: {:?}", r); false }
    };

    if shutting_down {
        tracing::info!("shutting down");
        // The broker retires its distributors before returning.
        if let Ok(Err(e)) = server_task.await {
            tracing::error!(error = %e, "broker stopped with error");
        }
    }

    Ok(())
}
