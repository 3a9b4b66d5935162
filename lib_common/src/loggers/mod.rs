/// Log records and their one-line text form.
pub mod logrecord;
/// Highlight colours and the shared, mutex-guarded colour state.
pub mod highlight;
/// Formats records and publishes them to the console and the outbound queue.
pub mod loggerpipe;
/// Appends received lines to the aggregated log file with batched syncs.
pub mod logfile;
/// Operator diagnostics (`tracing`) setup.
pub mod setup;
