//! # Project Test Helpers
//!
//! Shared fixtures for the integration tests under `tests/`: a scripted
//! memory provider, a logger whose lines are captured in memory, a running
//! accept loop on a loopback port, and a line-oriented TCP client.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lib_common::core::admission::{
    AdmissionController, AdmissionCounters, AdmissionOptions, AdmissionStats, ConnectionHandler,
};
use lib_common::core::shutdown::ShutdownHandle;
use lib_common::loggers::highlight::ColorState;
use lib_common::loggers::loggerpipe::{PipeLogger, PipeLoggerOptions};
use lib_common::protocols::memory::{MemoryProvider, ProviderError};
use lib_common::LogLine;

/// # Scripted Memory
///
/// Hands out queued MiB readings in order and then keeps repeating the last
/// one. The percentage is fixed.
pub struct ScriptedMemory {
    readings: Mutex<VecDeque<Result<u64, ProviderError>>>,
    last: Mutex<Result<u64, ProviderError>>,
    percent: f64,
}

impl ScriptedMemory {
    pub fn new(readings: Vec<Result<u64, ProviderError>>, percent: f64) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
            last: Mutex::new(Ok(0)),
            percent,
        }
    }
}

impl MemoryProvider for ScriptedMemory {
    fn available_memory_mib(&self) -> Result<u64, ProviderError> {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.readings.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
    }

    fn free_memory_percent(&self) -> Result<f64, ProviderError> {
        Ok(self.percent)
    }
}

/// A logger that writes nowhere but into the returned receiver.
pub fn capture_logger(
    tag: &str,
    highlight: Option<Arc<ColorState>>,
) -> (Arc<PipeLogger>, mpsc::Receiver<LogLine>) {
    let (tx, rx) = mpsc::channel(256);
    let logger = PipeLogger::new(
        tag,
        tx,
        CancellationToken::new(),
        PipeLoggerOptions {
            use_tty: false,
            highlight,
        },
    );
    (Arc::new(logger), rx)
}

/// Every captured line so far, parsed, as `(message, attrs)`.
pub fn drain_messages(rx: &mut mpsc::Receiver<LogLine>) -> Vec<(String, Vec<(String, String)>)> {
    let mut out = Vec::new();
    while let Ok(line) = rx.try_recv() {
        let record = line.parse().expect("captured line parses");
        out.push((record.message, record.attrs));
    }
    out
}

/// An accept loop serving `handler` on an ephemeral loopback port.
pub struct RunningService {
    pub addr: SocketAddr,
    pub counters: Arc<AdmissionCounters>,
    pub token: CancellationToken,
    pub task: JoinHandle<AdmissionStats>,
}

impl RunningService {
    pub async fn start<H: ConnectionHandler>(handler: H, options: AdmissionOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let controller = AdmissionController::from_listener(listener, options);
        let addr = controller.local_addr().unwrap();
        let counters = controller.counters();
        let token = CancellationToken::new();
        let task = tokio::spawn(
            controller.serve(Arc::new(handler), ShutdownHandle::detached(token.clone())),
        );
        Self {
            addr,
            counters,
            token,
            task,
        }
    }

    /// Polls the counters until `done` holds, panicking after two seconds.
    pub async fn wait_until(&self, done: impl Fn(AdmissionStats) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !done(self.counters.snapshot()) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached: {:?}",
                self.counters.snapshot()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn stop(self) -> AdmissionStats {
        self.token.cancel();
        self.task.await.unwrap()
    }
}

/// # Line Client
///
/// Talks to a service the way a terminal client does: raw writes out,
/// newline-terminated reply lines in.
pub struct LineClient {
    stream: BufReader<TcpStream>,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.get_mut().write_all(bytes).await.unwrap();
    }

    /// The next raw reply line, `None` once the server closed the socket.
    pub async fn next_line(&mut self, wait: Duration) -> Option<String> {
        let mut line = String::new();
        match tokio::time::timeout(wait, self.stream.read_line(&mut line)).await {
            Ok(Ok(0)) | Ok(Err(_)) => None,
            Ok(Ok(_)) => Some(line),
            Err(_) => panic!("no reply within {wait:?}"),
        }
    }

    /// The `message=` part of the next reply line.
    pub async fn next_message(&mut self) -> Option<String> {
        let line = self.next_line(Duration::from_secs(2)).await?;
        let (_, message) = line.split_once("message=")?;
        Some(message.trim_end().to_string())
    }

    /// Whether nothing arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        let mut line = String::new();
        tokio::time::timeout(wait, self.stream.read_line(&mut line))
            .await
            .is_err()
    }
}
