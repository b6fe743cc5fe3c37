//! siftd — research task relay daemon.

use anyhow::{Context, Result};

use sift_api::ApiState;
use sift_core::config::SiftConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SiftConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = SiftConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        let mut config = SiftConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    });

    tracing::info!(
        upstream = %config.upstream.base_url,
        worker_mode = ?config.worker.mode,
        connect_attempts = config.upstream.connect_attempts,
        "siftd starting"
    );

    let state = ApiState::from_config(&config);

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
    };

    sift_api::serve(state, &config.api.bind, config.api.port, shutdown)
        .await
        .context("API server failed")?;

    tracing::info!("siftd stopped");
    Ok(())
}
