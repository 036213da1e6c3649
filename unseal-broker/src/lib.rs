pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod state;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use unseal_core::Broker;

pub use config::{BrokerConfig, ConfigOverrides, LogFormat};
pub use state::AppState;
pub use telemetry::CorrelationId;

pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let http_addr = config.http_addr()?;
    let state = build_state(&config)?;

    let http_listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind http listener on {http_addr}"))?;

    let http_addr = http_listener.local_addr()?;
    info!(%http_addr, "http server listening");

    axum::serve(http_listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("broker stopped");
    Ok(())
}

/// In-memory broker with the built-in policies and a root token.
pub fn build_state(config: &BrokerConfig) -> anyhow::Result<AppState> {
    build_state_with(Broker::in_memory(), config)
}

pub fn build_state_with(broker: Broker, config: &BrokerConfig) -> anyhow::Result<AppState> {
    let root = broker
        .bootstrap(config.root_token.as_deref())
        .context("failed to bootstrap the root token")?;

    if config.root_token.is_some() {
        info!(accessor = %root.accessor, "root token configured");
    } else {
        warn!(
            accessor = %root.accessor,
            root_token = %root.token_id,
            "generated root token; it is not shown again"
        );
    }

    Ok(AppState::new(Arc::new(broker)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(?err, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
