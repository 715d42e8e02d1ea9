//! Questline service binary.
//!
//! Loads configuration from the environment, exposes Prometheus metrics,
//! assembles the [`App`], and runs until SIGTERM or Ctrl+C.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use questline_service::{App, Config};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env();

    let metrics_addr: SocketAddr = config
        .service
        .metrics_addr()
        .parse()
        .context("parse metrics address")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("install Prometheus exporter")?;
    info!(%metrics_addr, "metrics exporter listening");

    let mut app = App::new(config).await.context("assemble service")?;
    app.start().await.context("start service")?;
    info!("questline service running, press Ctrl+C to stop");

    shutdown_signal().await?;
    app.shutdown().await.context("shut down cleanly")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,questline_service=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            result = ctrl_c => result.context("install Ctrl+C handler")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await.context("install Ctrl+C handler")?;

    info!("shutdown signal received");
    Ok(())
}
