//! Server drain.
//!
//! Every WebSocket session runs under [`ShutdownCoordinator::run_session`],
//! so draining can wait until each one has removed its memberships from the
//! registry, not just until the listener stops.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// How a [`ShutdownCoordinator::drain`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The listener stopped and every session finished its cleanup.
    Complete,
    /// The grace period ran out first.
    TimedOut {
        /// Sessions still running when the grace period expired.
        sessions_left: usize,
    },
}

/// Server-wide stop signal plus the set of live sessions.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    stop: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Coordinator with no sessions and the stop signal unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancelled when draining starts. The listener and sessions watch it.
    pub fn token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Draining has started; new sessions are refused.
    pub fn is_draining(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Run one session to completion, counted as live until it returns.
    pub async fn run_session<F>(&self, session: F)
    where
        F: Future<Output = ()>,
    {
        self.sessions.track_future(session).await;
    }

    /// Stop the listener and every session, then wait up to `grace` for the
    /// serve task to end and all sessions to finish cleanup.
    pub async fn drain(&self, serve: JoinHandle<()>, grace: Duration) -> DrainOutcome {
        self.stop.cancel();
        let _ = self.sessions.close();
        info!(sessions = self.sessions.len(), grace = ?grace, "draining server");

        let sessions = self.sessions.clone();
        let settled = tokio::time::timeout(grace, async move {
            if let Err(e) = serve.await {
                warn!(error = %e, "serve task ended abnormally");
            }
            sessions.wait().await;
        })
        .await;

        if settled.is_ok() {
            info!("drain complete");
            DrainOutcome::Complete
        } else {
            let sessions_left = self.sessions.len();
            warn!(sessions_left, grace = ?grace, "drain grace period expired");
            DrainOutcome::TimedOut { sessions_left }
        }
    }
}
