//! # Pipe Transport
//!
//! Every service process ships its log lines through one well-known FIFO,
//! and a single aggregator process reads them back out. Each process opens
//! the FIFO once, in read/write mode, so opening never waits for a peer and
//! a writer never sees a broken pipe while the aggregator restarts.
//!
//! - **`named_pipe`**: the FIFO handles themselves.
//! - **`shipper`**: the long-lived tasks moving lines between the in-process
//!   queues and the FIFO.

/// FIFO creation and the writer/reader handles.
pub mod named_pipe;
/// Queue-to-pipe and pipe-to-queue pump tasks.
pub mod shipper;

pub use named_pipe::{create_fifo, LineSource, PipeError, PipeReader, PipeWriter, PIPE_BUF};
pub use shipper::{pump_inbound, ship_outbound};
