use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

use crate::core::admission::{AdmissionOptions, DEFAULT_MAX_CONNECTIONS};
use crate::loggers::logfile::DEFAULT_SYNC_EVERY;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PIPE_PATH: &str = "/tmp/log_pipe";
pub const DEFAULT_LOG_FILE: &str = "/tmp/logs.txt";
pub const COLOR_SERVER_PORT: u16 = 5001;
pub const MEMORY_SERVER_PORT: u16 = 5002;
pub const DEFAULT_DEADLINE_SECS: u64 = 600;
pub const DEFAULT_GRACE_SECS: u64 = 5;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_AGGREGATOR_QUEUE: usize = 200;
/// Permissions of a FIFO created by the aggregator (before umask).
pub const DEFAULT_PIPE_MODE: u32 = 0o666;

/// # Service Config
///
/// Settings shared by both TCP services. The port has no fixed default here;
/// each binary supplies its own.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    #[arg(long, env = "SERVER_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[arg(long, env = "SERVER_HOST", default_value = DEFAULT_HOST, help = "Address to bind.")]
    pub host: String,

    #[arg(long, env = "LOG_PIPE_PATH", default_value = DEFAULT_PIPE_PATH, help = "Named pipe the log lines are shipped to.")]
    pub pipe_path: PathBuf,

    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS, help = "Concurrent connection budget.")]
    pub max_connections: usize,

    #[arg(long, env = "CONNECTION_DEADLINE_SECS", default_value_t = DEFAULT_DEADLINE_SECS, help = "Absolute lifetime of one connection, in seconds.")]
    pub deadline_secs: u64,

    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = DEFAULT_GRACE_SECS, help = "Seconds to wait for in-flight work after a shutdown signal.")]
    pub grace_secs: u64,

    #[arg(long, env = "LOG_NO_TTY", help = "Do not echo log lines on stdout.")]
    pub no_tty: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: DEFAULT_HOST.to_string(),
            pipe_path: PathBuf::from(DEFAULT_PIPE_PATH),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            deadline_secs: DEFAULT_DEADLINE_SECS,
            grace_secs: DEFAULT_GRACE_SECS,
            no_tty: false,
        }
    }
}

impl ServiceConfig {
    /// `host:port`, falling back to `default_port`.
    pub fn listen_addr(&self, default_port: u16) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(default_port))
    }

    pub fn admission_options(&self) -> AdmissionOptions {
        AdmissionOptions {
            max_connections: self.max_connections,
            deadline: Duration::from_secs(self.deadline_secs),
        }
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl fmt::Display for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServiceConfig
    Host: {},
    Port: {},
    Pipe: {},
    Max connections: {},
    Deadline: {}s,
    Grace: {}s,
    Console echo: {}
",
            self.host,
            self.port.map_or_else(|| "default".to_string(), |p| p.to_string()),
            self.pipe_path.display(),
            self.max_connections,
            self.deadline_secs,
            self.grace_secs,
            !self.no_tty,
        )
    }
}

/// Command line of `server_color`.
#[derive(Parser, Debug, Clone, Default)]
#[command(about = "Colour negotiation service (service 1)", version)]
pub struct ColorServerConfig {
    #[command(flatten)]
    pub service: ServiceConfig,
}

/// Command line of `server_memory`.
#[derive(Parser, Debug, Clone)]
#[command(about = "Memory statistics service (service 2)", version)]
pub struct MemoryServerConfig {
    #[command(flatten)]
    pub service: ServiceConfig,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS, help = "Long-mode polling interval in milliseconds.")]
    pub poll_interval_ms: u64,
}

impl Default for MemoryServerConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl MemoryServerConfig {
    /// Never zero, so long mode cannot spin.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// # Aggregator Config
///
/// Command line of `server_log`.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "Collects log lines from the named pipe into one file", version)]
pub struct AggregatorConfig {
    #[arg(long, env = "LOG_PIPE_PATH", default_value = DEFAULT_PIPE_PATH, help = "Named pipe to read log lines from.")]
    pub pipe_path: PathBuf,

    #[arg(long, env = "LOG_FILE_PATH", default_value = DEFAULT_LOG_FILE, help = "File the log lines are appended to.")]
    pub log_file: PathBuf,

    #[arg(long, env = "SYNC_EVERY", default_value_t = DEFAULT_SYNC_EVERY, help = "Writes between two data syncs.")]
    pub sync_every: u64,

    #[arg(long, env = "LOG_QUEUE_CAPACITY", default_value_t = DEFAULT_AGGREGATOR_QUEUE, help = "Lines buffered between the pipe and the file.")]
    pub queue_capacity: usize,

    #[arg(long, env = "LOG_PIPE_CREATE", help = "Create the named pipe if it does not exist.")]
    pub create_pipe: bool,

    #[arg(long, env = "LOG_NO_ECHO", help = "Do not mirror received lines on stdout.")]
    pub no_echo: bool,

    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = DEFAULT_GRACE_SECS, help = "Seconds to wait for the writer to drain after a shutdown signal.")]
    pub grace_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            pipe_path: PathBuf::from(DEFAULT_PIPE_PATH),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            sync_every: DEFAULT_SYNC_EVERY,
            queue_capacity: DEFAULT_AGGREGATOR_QUEUE,
            create_pipe: false,
            no_echo: false,
            grace_secs: DEFAULT_GRACE_SECS,
        }
    }
}

impl AggregatorConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl fmt::Display for AggregatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AggregatorConfig
    Pipe: {},
    Log file: {},
    Sync every: {},
    Queue capacity: {},
    Create pipe: {},
    Echo: {}
",
            self.pipe_path.display(),
            self.log_file.display(),
            self.sync_every,
            self.queue_capacity,
            self.create_pipe,
            !self.no_echo,
        )
    }
}
