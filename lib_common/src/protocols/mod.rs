//! # Protocols
//!
//! Per-connection state machines. Both handlers are generic over the stream
//! type, so they run on a `TcpStream` under the admission controller and on
//! in-memory duplex streams in tests.
//!
//! - **`reply`**: reply-line framing, single reads and the shared session
//!   error type.
//! - **`color`**: attribute negotiation (service 1).
//! - **`memory`**: mode/metric negotiation (service 2).

pub mod color;
pub mod memory;
pub mod reply;

pub use color::{ColorNegotiation, ColorOutcome};
pub use memory::{MemoryNegotiation, MemoryProvider, Metric, MetricValue, Mode, ProviderError};
pub use reply::{ProtocolError, ReplyStyle};
