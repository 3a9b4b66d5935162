use std::io::Write;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::highlight::ColorState;
use super::logrecord::{Level, LogLine, LogRecord};

/// Capacity of the outbound queue between the logger and the pipe shipper.
/// One slot makes every enqueue a hand-off to the shipper.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1;

/// # Publish Error
///
/// Why a line reached the console but not the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PublishError {
    /// Shutdown was signaled while waiting for queue space.
    #[error("log pipeline is shutting down")]
    ShuttingDown,

    /// The shipper task has exited and dropped the queue.
    #[error("log shipper has stopped")]
    QueueClosed,

    /// No free slot for a non-waiting enqueue.
    #[error("outbound queue is full")]
    QueueFull,
}

#[derive(Debug, Clone, Default)]
/// # Pipe Logger Options
///
/// Controls where a [`PipeLogger`] writes besides the outbound queue.
pub struct PipeLoggerOptions {
    /// Echo every line on stdout.
    pub use_tty: bool,
    /// Paint messages with the current colour of this shared state.
    pub highlight: Option<Arc<ColorState>>,
}

/// # Pipe Logger
///
/// Formats records into lines and publishes each line twice: to the local
/// console and to the outbound queue feeding the pipe shipper.
///
/// One instance is built at startup and shared by reference with every
/// handler. Enqueueing waits for queue space; it only gives up when
/// shutdown is signaled or the shipper is gone, and the line has still been
/// written locally in both cases.
pub struct PipeLogger {
    /// Tag rendered as `server=<tag>`.
    server: String,
    /// Configuration options determining logging behavior.
    options: PipeLoggerOptions,
    /// Sending half of the outbound queue.
    outbound: mpsc::Sender<LogLine>,
    /// Process-wide cancellation signal.
    shutdown: CancellationToken,
}

impl PipeLogger {
    /// Creates a new `PipeLogger`.
    ///
    /// # Arguments
    /// * `server` - The service tag stamped on every line.
    /// * `outbound` - The sending half of the outbound queue.
    /// * `shutdown` - Cancels pending enqueues when the process is stopping.
    /// * `options` - Console echo and highlight settings.
    pub fn new(
        server: impl Into<String>,
        outbound: mpsc::Sender<LogLine>,
        shutdown: CancellationToken,
        options: PipeLoggerOptions,
    ) -> Self {
        Self {
            server: server.into(),
            options,
            outbound,
            shutdown,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Formats a record and publishes it.
    ///
    /// The console copy is written first and unconditionally; the returned
    /// error only concerns the outbound queue.
    ///
    /// # Arguments
    /// * `level` - Severity of the record.
    /// * `message` - The main message.
    /// * `attrs` - Extra `key=value` pairs in rendering order.
    pub async fn log(
        &self,
        level: Level,
        message: &str,
        attrs: &[(&str, String)],
    ) -> Result<(), PublishError> {
        let line = self.render(level, message, attrs);
        self.publish(line).await
    }

    /// Formats a record and publishes it without waiting for queue space.
    ///
    /// Meant for the last record of a stopping process, which must not hold
    /// up shutdown: with the shipper stuck on a full pipe the line only
    /// reaches the console.
    pub fn try_log(
        &self,
        level: Level,
        message: &str,
        attrs: &[(&str, String)],
    ) -> Result<(), PublishError> {
        let line = self.render(level, message, attrs);
        let result = self.outbound.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => PublishError::QueueFull,
            TrySendError::Closed(_) => PublishError::QueueClosed,
        });
        if let Err(e) = result {
            tracing::debug!(server = %self.server, reason = %e, "log line not shipped");
        }
        result
    }

    /// Builds the line and writes the console copy.
    fn render(&self, level: Level, message: &str, attrs: &[(&str, String)]) -> LogLine {
        let record = attrs
            .iter()
            .fold(LogRecord::new(level, self.server.as_str(), message), |record, (key, value)| {
                record.with(*key, value)
            });
        let line = match &self.options.highlight {
            Some(state) => record.to_line_painted(state.get()),
            None => record.to_line(),
        };

        if self.options.use_tty {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(line.as_bytes()) {
                tracing::debug!(error = %e, "console write failed");
            }
        }
        line
    }

    async fn publish(&self, line: LogLine) -> Result<(), PublishError> {
        let result = tokio::select! {
            sent = self.outbound.send(line) => sent.map_err(|_| PublishError::QueueClosed),
            _ = self.shutdown.cancelled() => Err(PublishError::ShuttingDown),
        };
        if let Err(e) = result {
            tracing::debug!(server = %self.server, reason = %e, "log line not shipped");
        }
        result
    }

    /// Logs a message at the DEBUG level.
    pub async fn debug(&self, message: &str, attrs: &[(&str, String)]) {
        let _ = self.log(Level::Debug, message, attrs).await;
    }

    /// Logs a message at the INFO level.
    pub async fn info(&self, message: &str, attrs: &[(&str, String)]) {
        let _ = self.log(Level::Info, message, attrs).await;
    }

    /// Logs a message at the WARN level.
    pub async fn warn(&self, message: &str, attrs: &[(&str, String)]) {
        let _ = self.log(Level::Warn, message, attrs).await;
    }

    /// Logs a message at the ERROR level.
    pub async fn error(&self, message: &str, attrs: &[(&str, String)]) {
        let _ = self.log(Level::Error, message, attrs).await;
    }
}
