//! # Mode/Metric Negotiation
//!
//! Service 2. Two prompts pick a reporting mode and a memory metric:
//!
//! ```text
//! AwaitMode -> AwaitMetric -> Simple: one reply        -> Closed
//!                          -> Long:   reply on change  -> Closed
//! ```
//!
//! An invalid selector at either step is answered once and the session
//! ends. In long mode the provider is polled at a fixed interval and a line
//! is sent only when the rendered value differs from the last one sent; the
//! first value always goes out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::reply::{read_once, send_message, trimmed_input, ProtocolError, ReplyStyle};
use crate::core::admission::{Connection, ConnectionHandler};
use crate::loggers::loggerpipe::PipeLogger;

pub const MODE_PROMPT: &str = "choose option: (1 - simple, 2 - long)";
pub const METRIC_PROMPT: &str =
    "choose parameter: (1 - available memory in Mb, 2 - free memory percent)";
pub const NOT_VALID_OPTION: &str = "not valid option";

/// Selector reads are at most this long ("1", "2", optionally with `\n`).
pub const SELECTOR_LEN: usize = 2;
/// Default long-mode polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("memory statistics unavailable: {0}")]
    Unavailable(String),
}

/// # Memory Provider
///
/// Source of the two metrics. Production uses the host's statistics; tests
/// script the values.
pub trait MemoryProvider: Send + Sync + 'static {
    /// Available memory in MiB (1 048 576 bytes), truncated.
    fn available_memory_mib(&self) -> Result<u64, ProviderError>;
    /// Available memory as a percentage of total memory.
    fn free_memory_percent(&self) -> Result<f64, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Simple,
    Long,
}

impl Mode {
    pub fn from_selector(bytes: &[u8]) -> Option<Self> {
        match trimmed_input(bytes)? {
            "1" => Some(Mode::Simple),
            "2" => Some(Mode::Long),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    AvailableMib,
    FreePercent,
}

impl Metric {
    pub fn from_selector(bytes: &[u8]) -> Option<Self> {
        match trimmed_input(bytes)? {
            "1" => Some(Metric::AvailableMib),
            "2" => Some(Metric::FreePercent),
            _ => None,
        }
    }

    /// Reads this metric from `provider`.
    pub fn sample<P: MemoryProvider + ?Sized>(&self, provider: &P) -> Result<MetricValue, ProviderError> {
        match self {
            Metric::AvailableMib => provider.available_memory_mib().map(MetricValue::AvailableMib),
            Metric::FreePercent => provider.free_memory_percent().map(MetricValue::FreePercent),
        }
    }
}

/// One sampled value; its `Display` form is the reply text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    AvailableMib(u64),
    FreePercent(f64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::AvailableMib(mib) => write!(f, "available memory in Mb - {mib}"),
            MetricValue::FreePercent(pct) => write!(f, "free memory percents - {pct:.2}"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Simple mode answered.
    Replied,
    /// A selector was rejected.
    InvalidOption,
    /// The provider failed; the client was told.
    ProviderFailed(ProviderError),
    /// Long mode stopped on shutdown.
    Cancelled,
}

pub struct MemoryNegotiation<P> {
    provider: Arc<P>,
    logger: Arc<PipeLogger>,
    poll_interval: Duration,
}

impl<P: MemoryProvider> MemoryNegotiation<P> {
    pub fn new(provider: Arc<P>, logger: Arc<PipeLogger>, poll_interval: Duration) -> Self {
        Self {
            provider,
            logger,
            poll_interval,
        }
    }

    /// Runs one session and logs its start, result and end.
    pub async fn serve<S>(&self, mut conn: Connection<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ordinal = conn.ordinal.to_string();
        self.logger
            .info("start serving", &[("conn", ordinal.clone())])
            .await;

        match self.negotiate(&mut conn).await {
            Ok(SessionEnd::Replied | SessionEnd::Cancelled) => {}
            Ok(SessionEnd::InvalidOption) => {
                self.logger
                    .warn(NOT_VALID_OPTION, &[("conn", ordinal.clone())])
                    .await;
            }
            Ok(SessionEnd::ProviderFailed(e)) => {
                self.logger
                    .error(&e.to_string(), &[("conn", ordinal.clone())])
                    .await;
            }
            Err(ProtocolError::Write(_) | ProtocolError::ClientClosed) => {
                self.logger
                    .info("stop serving - client disconnected", &[("conn", ordinal.clone())])
                    .await;
            }
            Err(e) => {
                self.logger
                    .error(&e.to_string(), &[("conn", ordinal.clone())])
                    .await;
            }
        }

        self.logger.info("stop serving", &[("conn", ordinal)]).await;
    }

    /// Drives the prompts and the selected reporting mode.
    pub async fn negotiate<S>(&self, conn: &mut Connection<S>) -> Result<SessionEnd, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut selector = [0u8; SELECTOR_LEN];

        send_message(&mut conn.stream, ReplyStyle::Rfc822, MODE_PROMPT).await?;
        let n = read_once(&mut conn.stream, &mut selector, &conn.shutdown).await?;
        let Some(mode) = Mode::from_selector(&selector[..n]) else {
            send_message(&mut conn.stream, ReplyStyle::Rfc822, NOT_VALID_OPTION).await?;
            return Ok(SessionEnd::InvalidOption);
        };

        send_message(&mut conn.stream, ReplyStyle::Rfc822, METRIC_PROMPT).await?;
        let n = read_once(&mut conn.stream, &mut selector, &conn.shutdown).await?;
        let Some(metric) = Metric::from_selector(&selector[..n]) else {
            send_message(&mut conn.stream, ReplyStyle::Rfc822, NOT_VALID_OPTION).await?;
            return Ok(SessionEnd::InvalidOption);
        };

        match mode {
            Mode::Simple => self.respond_once(conn, metric).await,
            Mode::Long => self.stream_changes(conn, metric).await,
        }
    }

    async fn respond_once<S>(
        &self,
        conn: &mut Connection<S>,
        metric: Metric,
    ) -> Result<SessionEnd, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match metric.sample(self.provider.as_ref()) {
            Ok(value) => {
                send_message(&mut conn.stream, ReplyStyle::Rfc822, &value.to_string()).await?;
                Ok(SessionEnd::Replied)
            }
            Err(e) => self.report_failure(conn, e).await,
        }
    }

    async fn stream_changes<S>(
        &self,
        conn: &mut Connection<S>,
        metric: Metric,
    ) -> Result<SessionEnd, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut last_sent: Option<String> = None;

        loop {
            let value = match metric.sample(self.provider.as_ref()) {
                Ok(value) => value.to_string(),
                Err(e) => return self.report_failure(conn, e).await,
            };

            if last_sent.as_deref() != Some(value.as_str()) {
                send_message(&mut conn.stream, ReplyStyle::Rfc822, &value).await?;
                debug!(ordinal = conn.ordinal, %value, "metric update sent");
                last_sent = Some(value);
            }

            tokio::select! {
                _ = conn.shutdown.cancelled() => return Ok(SessionEnd::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn report_failure<S>(
        &self,
        conn: &mut Connection<S>,
        error: ProviderError,
    ) -> Result<SessionEnd, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let message = format!("error occured on server - {error}");
        send_message(&mut conn.stream, ReplyStyle::Rfc822, &message).await?;
        Ok(SessionEnd::ProviderFailed(error))
    }
}

impl<P: MemoryProvider> ConnectionHandler for MemoryNegotiation<P> {
    async fn handle(&self, conn: Connection) {
        self.serve(conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loggers::loggerpipe::PipeLoggerOptions;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    /// Returns scripted values in order, then repeats the last one.
    struct Scripted {
        mib: Mutex<VecDeque<Result<u64, ProviderError>>>,
        last: Mutex<Option<Result<u64, ProviderError>>>,
    }

    impl Scripted {
        fn new(values: Vec<Result<u64, ProviderError>>) -> Self {
            Self {
                mib: Mutex::new(values.into()),
                last: Mutex::new(None),
            }
        }
    }

    impl MemoryProvider for Scripted {
        fn available_memory_mib(&self) -> Result<u64, ProviderError> {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.mib.lock().unwrap().pop_front() {
                *last = Some(next);
            }
            last.clone().unwrap_or(Ok(0))
        }

        fn free_memory_percent(&self) -> Result<f64, ProviderError> {
            Ok(42.126)
        }
    }

    fn negotiation(
        provider: Scripted,
    ) -> (MemoryNegotiation<Scripted>, mpsc::Receiver<crate::LogLine>) {
        let (tx, rx) = mpsc::channel(64);
        let logger = PipeLogger::new("2", tx, CancellationToken::new(), PipeLoggerOptions::default());
        let handler =
            MemoryNegotiation::new(Arc::new(provider), Arc::new(logger), Duration::from_millis(10));
        (handler, rx)
    }

    fn connection(stream: DuplexStream, shutdown: CancellationToken) -> Connection<DuplexStream> {
        Connection {
            stream,
            peer: "127.0.0.1:40000".parse().unwrap(),
            ordinal: 1,
            deadline: Instant::now() + Duration::from_secs(60),
            shutdown,
        }
    }

    async fn next_message(reader: &mut BufReader<DuplexStream>) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .ok()?
            .ok()?;
        if read == 0 {
            return None;
        }
        line.split_once(", message=")
            .map(|(_, message)| message.trim_end().to_string())
    }

    #[test]
    fn selectors() {
        assert_eq!(Mode::from_selector(b"1"), Some(Mode::Simple));
        assert_eq!(Mode::from_selector(b"2\n"), Some(Mode::Long));
        assert_eq!(Mode::from_selector(b"3"), None);
        assert_eq!(Mode::from_selector(b"12"), None);
        assert_eq!(Metric::from_selector(b"2"), Some(Metric::FreePercent));
        assert_eq!(Metric::from_selector(b""), None);
    }

    #[test]
    fn metric_text() {
        assert_eq!(MetricValue::AvailableMib(500).to_string(), "available memory in Mb - 500");
        assert_eq!(MetricValue::FreePercent(37.5).to_string(), "free memory percents - 37.50");
    }

    #[tokio::test]
    async fn invalid_mode_ends_before_the_metric_prompt() {
        let (handler, _logs) = negotiation(Scripted::new(vec![]));
        let (client, server) = tokio::io::duplex(1024);
        let mut client = BufReader::new(client);
        let session = tokio::spawn(async move {
            let mut conn = connection(server, CancellationToken::new());
            handler.negotiate(&mut conn).await
        });

        assert_eq!(next_message(&mut client).await.as_deref(), Some(MODE_PROMPT));
        client.get_mut().write_all(b"9").await.unwrap();
        assert_eq!(next_message(&mut client).await.as_deref(), Some(NOT_VALID_OPTION));
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::InvalidOption);
        assert_eq!(next_message(&mut client).await, None);
    }

    #[tokio::test]
    async fn simple_mode_answers_once() {
        let (handler, _logs) = negotiation(Scripted::new(vec![]));
        let (client, server) = tokio::io::duplex(1024);
        let mut client = BufReader::new(client);
        let session = tokio::spawn(async move {
            let mut conn = connection(server, CancellationToken::new());
            handler.negotiate(&mut conn).await
        });

        next_message(&mut client).await;
        client.get_mut().write_all(b"1").await.unwrap();
        assert_eq!(next_message(&mut client).await.as_deref(), Some(METRIC_PROMPT));
        client.get_mut().write_all(b"2").await.unwrap();
        assert_eq!(
            next_message(&mut client).await.as_deref(),
            Some("free memory percents - 42.13")
        );
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::Replied);
    }

    #[tokio::test]
    async fn long_mode_sends_only_changes() {
        let (handler, _logs) = negotiation(Scripted::new(vec![Ok(500), Ok(500), Ok(300)]));
        let (client, server) = tokio::io::duplex(1024);
        let mut client = BufReader::new(client);
        let token = CancellationToken::new();
        let session = tokio::spawn({
            let token = token.clone();
            async move {
                let mut conn = connection(server, token);
                handler.negotiate(&mut conn).await
            }
        });

        next_message(&mut client).await;
        client.get_mut().write_all(b"2").await.unwrap();
        next_message(&mut client).await;
        client.get_mut().write_all(b"1").await.unwrap();

        assert_eq!(
            next_message(&mut client).await.as_deref(),
            Some("available memory in Mb - 500")
        );
        assert_eq!(
            next_message(&mut client).await.as_deref(),
            Some("available memory in Mb - 300")
        );
        // 300 repeats from here on; nothing more is sent.
        let mut line = String::new();
        let quiet =
            tokio::time::timeout(Duration::from_millis(100), client.read_line(&mut line)).await;
        assert!(quiet.is_err());

        token.cancel();
        assert_eq!(session.await.unwrap().unwrap(), SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn provider_failure_is_reported_to_the_client() {
        let failure = ProviderError::Unavailable("no /proc/meminfo".into());
        let (handler, _logs) = negotiation(Scripted::new(vec![Ok(800), Err(failure.clone())]));
        let (client, server) = tokio::io::duplex(1024);
        let mut client = BufReader::new(client);
        let session = tokio::spawn(async move {
            let mut conn = connection(server, CancellationToken::new());
            handler.negotiate(&mut conn).await
        });

        next_message(&mut client).await;
        client.get_mut().write_all(b"2").await.unwrap();
        next_message(&mut client).await;
        client.get_mut().write_all(b"1").await.unwrap();

        assert_eq!(
            next_message(&mut client).await.as_deref(),
            Some("available memory in Mb - 800")
        );
        assert_eq!(
            next_message(&mut client).await.as_deref(),
            Some("error occured on server - memory statistics unavailable: no /proc/meminfo")
        );
        assert_eq!(
            session.await.unwrap().unwrap(),
            SessionEnd::ProviderFailed(failure)
        );
    }

    #[tokio::test]
    async fn disconnect_ends_long_mode() {
        let (handler, _logs) = negotiation(Scripted::new(vec![Ok(1), Ok(2), Ok(3), Ok(4)]));
        let (client, server) = tokio::io::duplex(1024);
        let mut client = BufReader::new(client);
        let session = tokio::spawn(async move {
            let mut conn = connection(server, CancellationToken::new());
            handler.negotiate(&mut conn).await
        });

        next_message(&mut client).await;
        client.get_mut().write_all(b"2").await.unwrap();
        next_message(&mut client).await;
        client.get_mut().write_all(b"1").await.unwrap();
        next_message(&mut client).await;
        drop(client);

        let result = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ProtocolError::Write(_))));
    }
}
