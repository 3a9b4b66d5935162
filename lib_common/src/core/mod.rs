//! # Core Serving Module
//!
//! The pieces every TCP service process is built around.
//!
//! ## Core Components:
//!
//! - **`admission`**: the accept loop gated by a fixed connection budget.
//!   Each accepted connection gets an absolute deadline and its own task,
//!   which gives its budget unit back when it ends, error or not.
//!
//! - **`shutdown`**: the process-wide cancellation signal. It turns SIGINT
//!   and SIGTERM into one token observed by the accept loop, the handlers
//!   and the log pipeline, and bounds the drain with a grace period.

#![forbid(unsafe_code)]

/// Budgeted accept loop and per-connection dispatch.
pub mod admission;
/// Signal handling, cancellation fan-out and the grace period.
pub mod shutdown;

// --- Public API Re-exports ---
pub use admission::{
    AdmissionController, AdmissionError, AdmissionOptions, AdmissionStats, Connection,
    ConnectionHandler,
};
pub use shutdown::{ShutdownCoordinator, ShutdownHandle, ShutdownOutcome, ShutdownReason};
