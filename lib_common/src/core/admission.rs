//! # Admission Controller
//!
//! The accept loop shared by both TCP services. A counting semaphore holds
//! the connection budget: a permit is acquired *before* `accept`, moved into
//! the connection's task, and released when that task ends however it ends.
//! With every permit out, the loop simply stops accepting and further
//! clients wait in the kernel backlog.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::shutdown::ShutdownHandle;

/// Concurrent connections allowed by default.
pub const DEFAULT_MAX_CONNECTIONS: usize = 20;
/// Absolute lifetime of one connection.
pub const DEFAULT_CONNECTION_DEADLINE: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),
}

/// # Connection
///
/// One accepted client, owned by exactly one task.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    pub stream: S,
    pub peer: SocketAddr,
    /// 1-based position in accept order, for logs.
    pub ordinal: u64,
    /// The moment the connection is dropped whatever its state.
    pub deadline: Instant,
    /// Process-wide shutdown signal.
    pub shutdown: CancellationToken,
}

/// Serves one connection to completion.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, conn: Connection) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct AdmissionOptions {
    pub max_connections: usize,
    pub deadline: Duration,
}

impl Default for AdmissionOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            deadline: DEFAULT_CONNECTION_DEADLINE,
        }
    }
}

/// Snapshot of the controller's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Connections dispatched since start.
    pub served: u64,
    /// Handlers running right now.
    pub active: usize,
}

#[derive(Debug, Default)]
pub struct AdmissionCounters {
    served: AtomicU64,
    active: AtomicUsize,
}

impl AdmissionCounters {
    pub fn snapshot(&self) -> AdmissionStats {
        AdmissionStats {
            served: self.served.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
        }
    }
}

struct ActiveGuard(Arc<AdmissionCounters>);

impl ActiveGuard {
    fn enter(counters: &Arc<AdmissionCounters>) -> Self {
        counters.active.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(Arc::clone(counters))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// # Admission Controller
pub struct AdmissionController {
    listener: TcpListener,
    budget: Arc<Semaphore>,
    options: AdmissionOptions,
    counters: Arc<AdmissionCounters>,
}

impl AdmissionController {
    /// Binds `addr` and prepares the budget.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        options: AdmissionOptions,
    ) -> Result<Self, AdmissionError> {
        let listener = TcpListener::bind(addr).await.map_err(AdmissionError::Bind)?;
        Ok(Self::from_listener(listener, options))
    }

    /// Wraps an already bound listener. A zero budget is raised to one.
    pub fn from_listener(listener: TcpListener, options: AdmissionOptions) -> Self {
        let options = AdmissionOptions {
            max_connections: options.max_connections.max(1),
            ..options
        };
        Self {
            listener,
            budget: Arc::new(Semaphore::new(options.max_connections)),
            options,
            counters: Arc::new(AdmissionCounters::default()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AdmissionError> {
        self.listener.local_addr().map_err(AdmissionError::LocalAddr)
    }

    /// Shared counters; stays valid after `serve` consumed the controller.
    pub fn counters(&self) -> Arc<AdmissionCounters> {
        Arc::clone(&self.counters)
    }

    /// Runs the accept loop until shutdown.
    ///
    /// Accept errors are logged and the loop goes on; the permit taken for
    /// that attempt is returned at once. Handler tasks are spawned through
    /// `shutdown`, so the grace period waits for them.
    pub async fn serve<H: ConnectionHandler>(
        self,
        handler: Arc<H>,
        shutdown: ShutdownHandle,
    ) -> AdmissionStats {
        info!(
            max_connections = self.options.max_connections,
            deadline_secs = self.options.deadline.as_secs(),
            "accepting connections"
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.budget).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let ordinal = self.counters.served.fetch_add(1, Ordering::SeqCst) + 1;
            let deadline = Instant::now() + self.options.deadline;
            debug!(%peer, ordinal, "connection accepted");

            let conn = Connection {
                stream,
                peer,
                ordinal,
                deadline,
                shutdown: shutdown.token().clone(),
            };
            let handler = Arc::clone(&handler);
            let active = ActiveGuard::enter(&self.counters);

            shutdown.spawn(async move {
                let _permit = permit;
                let _active = active;
                if tokio::time::timeout_at(deadline, handler.handle(conn))
                    .await
                    .is_err()
                {
                    warn!(%peer, ordinal, "connection deadline exceeded, closing");
                }
                debug!(%peer, ordinal, "connection released");
            });
        }

        let stats = self.counters.snapshot();
        info!(served = stats.served, active = stats.active, "accept loop stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    struct HoldUntilShutdown;

    impl ConnectionHandler for HoldUntilShutdown {
        async fn handle(&self, conn: Connection) {
            conn.shutdown.cancelled().await;
        }
    }

    struct Sleepy(Duration);

    impl ConnectionHandler for Sleepy {
        async fn handle(&self, _conn: Connection) {
            tokio::time::sleep(self.0).await;
        }
    }

    #[test]
    fn default_options() {
        let options = AdmissionOptions::default();
        assert_eq!(options.max_connections, 20);
        assert_eq!(options.deadline, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn cancel_stops_a_loop_waiting_for_budget() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let controller = AdmissionController::from_listener(
            listener,
            AdmissionOptions {
                max_connections: 1,
                ..AdmissionOptions::default()
            },
        );
        let addr = controller.local_addr().unwrap();
        let counters = controller.counters();
        let token = CancellationToken::new();
        let serving = tokio::spawn(controller.serve(
            Arc::new(HoldUntilShutdown),
            ShutdownHandle::detached(token.clone()),
        ));

        let _client = TcpStream::connect(addr).await.unwrap();
        while counters.snapshot().active < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(1), serving)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.served, 1);
    }

    #[tokio::test]
    async fn deadline_closes_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let controller = AdmissionController::from_listener(
            listener,
            AdmissionOptions {
                max_connections: 2,
                deadline: Duration::from_millis(100),
            },
        );
        let addr = controller.local_addr().unwrap();
        let counters = controller.counters();
        let token = CancellationToken::new();
        tokio::spawn(controller.serve(
            Arc::new(Sleepy(Duration::from_secs(30))),
            ShutdownHandle::detached(token.clone()),
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("deadline should close the socket");
        assert_eq!(read.unwrap(), 0);

        while counters.snapshot().active > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
    }
}
