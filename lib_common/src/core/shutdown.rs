//! # Shutdown Coordinator
//!
//! One cancellation signal per process. The coordinator owns the root
//! [`CancellationToken`] and a `tokio_graceful::Shutdown` built on it:
//!
//! 1. `wait_for_signal` returns on SIGINT, SIGTERM, or an explicit cancel.
//!    The caller may queue a farewell record here, but must not await
//!    anything before calling `shutdown`.
//! 2. `shutdown` cancels the token; the accept loop, every handler and the
//!    log pipeline observe it.
//! 3. `shutdown` then waits for every tracked task to finish, at most
//!    `grace`. Tasks still running after that are abandoned, not aborted.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_graceful::{Shutdown, ShutdownGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default grace period between the signal and process exit.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// What ended the wait in [`ShutdownCoordinator::wait_for_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    /// The token was cancelled from inside the process.
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownReason::Interrupt => "SIGINT",
            ShutdownReason::Terminate => "SIGTERM",
            ShutdownReason::Requested => "cancellation requested",
        })
    }
}

/// How the grace period ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every tracked task finished; carries the time it took.
    Graceful(Duration),
    /// The grace period ran out with tasks still running.
    TimedOut,
}

/// # Shutdown Handle
///
/// What components receive instead of the coordinator itself: the shared
/// token, plus a guard so the tasks they spawn are waited for during the
/// grace period.
#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    guard: Option<ShutdownGuard>,
}

impl ShutdownHandle {
    /// A handle that tracks nothing; spawned tasks are plain tokio tasks.
    /// Used where no coordinator exists, such as tests.
    pub fn detached(token: CancellationToken) -> Self {
        Self { token, guard: None }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been signaled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Spawns `task`; the coordinator's grace period waits for it.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.guard.clone();
        tokio::spawn(async move {
            let _guard = guard;
            task.await
        })
    }
}

/// # Shutdown Coordinator
///
/// Built once in `main`. Hand out [`ShutdownHandle`]s, wait for the signal,
/// then call [`ShutdownCoordinator::shutdown`].
pub struct ShutdownCoordinator {
    shutdown: Shutdown,
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        let token = CancellationToken::new();
        let shutdown = Shutdown::new(token.clone().cancelled_owned());
        Self {
            shutdown,
            token,
            grace,
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.token.clone(),
            guard: Some(self.shutdown.guard()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for SIGINT, SIGTERM, or a cancel of the token.
    ///
    /// The token is left alone; [`ShutdownCoordinator::shutdown`] cancels it.
    /// Whatever runs in between must not wait on the log pipeline, which may
    /// be backed up.
    pub async fn wait_for_signal(&self) -> ShutdownReason {
        let reason = tokio::select! {
            biased;
            _ = self.token.cancelled() => ShutdownReason::Requested,
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for SIGINT");
                }
                ShutdownReason::Interrupt
            }
            _ = terminate() => ShutdownReason::Terminate,
        };
        info!(%reason, "shutdown signal received");
        reason
    }

    /// Cancels the token and waits for tracked tasks, bounded by the grace
    /// period.
    pub async fn shutdown(self) -> ShutdownOutcome {
        self.token.cancel();
        match self.shutdown.shutdown_with_limit(self.grace).await {
            Ok(elapsed) => {
                info!(
                    "shutdown: gracefully {}s after shutdown signal received",
                    elapsed.as_secs_f64()
                );
                ShutdownOutcome::Graceful(elapsed)
            }
            Err(e) => {
                warn!("shutdown: grace period exhausted: {}", e);
                ShutdownOutcome::TimedOut
            }
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "failed to listen for SIGTERM");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
