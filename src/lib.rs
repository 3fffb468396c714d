pub mod address;
pub mod chat;
pub mod color;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod recovery;
pub mod server;
pub mod sheets;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod tools;
pub mod transport;

pub use config::{CliArgs, ServerConfig};
pub use error::{ErrorCode, ManglerError};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use server::build_router;
pub use shutdown::{ShutdownCoordinator, ShutdownPhase};
pub use state::AppState;

use anyhow::{Context, Result};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{Duration, timeout};

/// How long a drained server may take to close its remaining idle
/// connections before the task is aborted.
const SERVER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    let state = Arc::new(
        AppState::from_config(config.clone()).context("failed to build application state")?,
    );

    let coordinator = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout));
    let router = build_router(state, coordinator.clone());

    let listener = TcpListener::bind(config.http_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind_address))?;
    let actual_addr = listener.local_addr()?;
    tracing::info!(
        bind = %actual_addr,
        default_sheet = config.default_sheet_url.as_deref().unwrap_or("-"),
        "sheet mangler listening"
    );

    let token = coordinator.token();
    let mut server = tokio::spawn(
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .into_future(),
    );

    tokio::select! {
        joined = &mut server => {
            // The listener stopped without a shutdown signal.
            joined.context("server task panicked")??;
            return Ok(());
        }
        _ = coordinator.wait_for_signal() => {}
    }

    let phase = coordinator.shutdown().await;
    if phase == ShutdownPhase::Forced {
        server.abort();
        return Ok(());
    }
    match timeout(SERVER_EXIT_TIMEOUT, &mut server).await {
        Ok(joined) => joined.context("server task panicked")?.map_err(anyhow::Error::from),
        Err(_) => {
            tracing::warn!("server did not exit after draining, aborting");
            server.abort();
            Ok(())
        }
    }
}
