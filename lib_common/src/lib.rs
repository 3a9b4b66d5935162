//! # lib_common
//!
//! Shared building blocks for the TCP services and the log aggregator.
//!
//! - **`loggers`**: structured log records, their single-line rendering, the
//!   logger that publishes lines to the console and the outbound queue, and
//!   the durable log file writer used by the aggregator.
//! - **`transport`**: the named-pipe (FIFO) transport shared by every service
//!   process and the aggregator, plus the tasks pumping lines through it.
//! - **`core`**: the admission-controlled accept loop and the process-wide
//!   shutdown coordinator.
//! - **`protocols`**: the per-connection state machines of both services.
//! - **`configs`**: command-line and environment configuration.
//! - **`utils`**: process identity and host memory statistics.

#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "transport")]
pub mod transport;

#[cfg(feature = "server")]
pub mod configs;
#[cfg(feature = "server")]
pub mod core;
#[cfg(feature = "server")]
pub mod protocols;
#[cfg(feature = "server")]
pub mod utils;

// Re-export the types every binary touches.
#[cfg(feature = "loggers")]
pub use loggers::logrecord::{Level, LogLine, LogRecord};
#[cfg(feature = "loggers")]
pub use loggers::loggerpipe::PipeLogger;
