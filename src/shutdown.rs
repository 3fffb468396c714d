//! Graceful shutdown.
//!
//! On SIGINT or SIGTERM the coordinator cancels its token, which stops the
//! listener and flips readiness, then waits up to the configured grace period
//! for in-flight requests.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strum::Display;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ShutdownPhase {
    Running,
    /// No new connections; waiting for in-flight requests
    Draining,
    Complete,
    /// Grace period ran out with requests still active
    Forced,
}

pub struct ShutdownCoordinator {
    grace_period: Duration,
    phase: RwLock<ShutdownPhase>,
    token: CancellationToken,
    active_requests: Arc<AtomicU64>,
    idle: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            phase: RwLock::new(ShutdownPhase::Running),
            token: CancellationToken::new(),
            active_requests: Arc::new(AtomicU64::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.read()
    }

    pub fn active_request_count(&self) -> u64 {
        self.active_requests.load(Ordering::Acquire)
    }

    /// Count a request as in flight until the guard drops.
    pub fn track(&self) -> InFlightGuard {
        self.active_requests.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            active_requests: self.active_requests.clone(),
            idle: self.idle.clone(),
        }
    }

    /// Resolves on SIGINT or SIGTERM. A handler that cannot be installed is
    /// logged and that signal is ignored.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
            _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
            _ = self.token.cancelled() => debug!("shutdown requested programmatically"),
        }
    }

    /// Cancel the token and wait for in-flight requests, bounded by the
    /// grace period. Returns the phase reached.
    pub async fn shutdown(&self) -> ShutdownPhase {
        *self.phase.write() = ShutdownPhase::Draining;
        self.token.cancel();
        info!(
            active_requests = self.active_request_count(),
            grace_secs = self.grace_period.as_secs(),
            "draining in-flight requests"
        );

        let deadline = Instant::now() + self.grace_period;
        let mut drained = true;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active_request_count() == 0 {
                break;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    drained = self.active_request_count() == 0;
                    break;
                }
            }
        }

        let phase = if drained {
            ShutdownPhase::Complete
        } else {
            warn!(
                remaining_requests = self.active_request_count(),
                "grace period exceeded, forcing shutdown"
            );
            ShutdownPhase::Forced
        };
        *self.phase.write() = phase;
        info!(phase = %phase, "shutdown finished");
        phase
    }
}

/// Decrements the in-flight count on drop.
pub struct InFlightGuard {
    active_requests: Arc<AtomicU64>,
    idle: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.active_requests.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}
