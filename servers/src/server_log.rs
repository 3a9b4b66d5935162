//! # Log Aggregator
//!
//! Reads the log lines every service ships through the named pipe and
//! appends them to one file, syncing every `--sync-every` writes. Each line
//! is also echoed on stdout unless `--no-echo` is given.
//!
//! On SIGINT/SIGTERM the pipe reader stops, the writer drains whatever is
//! already queued, syncs, and the process exits. A failed pipe reader ends
//! the process the same way rather than leaving the writer idle.

mod startup;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use lib_common::configs::config_sys::{AggregatorConfig, DEFAULT_PIPE_MODE};
use lib_common::core::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use lib_common::loggers::logfile::DurableLogWriter;
use lib_common::transport::{create_fifo, pump_inbound, PipeReader};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AggregatorConfig::parse();
    let _guard = startup::init_diagnostics()?;
    info!("{}", config);

    if config.create_pipe && create_fifo(&config.pipe_path, DEFAULT_PIPE_MODE)? {
        info!(pipe = %config.pipe_path.display(), "created log pipe");
    }

    let reader = PipeReader::open(&config.pipe_path)
        .with_context(|| format!("opening log pipe {}", config.pipe_path.display()))?;
    let writer = DurableLogWriter::open(&config.log_file, config.sync_every).await?;

    let coordinator = ShutdownCoordinator::new(config.grace());
    let handle = coordinator.handle();
    let (lines, queue) = tokio::sync::mpsc::channel(config.queue_capacity.max(1));

    handle.spawn({
        let token = handle.token().clone();
        let echo = !config.no_echo;
        async move {
            if pump_inbound(reader, lines, token.clone(), echo).await.is_err() {
                error!("log pipe unreadable, shutting down");
                token.cancel();
            }
        }
    });
    handle.spawn(writer.run(queue, handle.token().clone()));
    drop(handle);
    info!(identity = ?startup::identity_attrs(), log_file = %config.log_file.display(), "Log server up");

    coordinator.wait_for_signal().await;
    match coordinator.shutdown().await {
        ShutdownOutcome::Graceful(_) => println!("Log server is down"),
        ShutdownOutcome::TimedOut => error!("log writer did not finish within the grace period"),
    }
    Ok(())
}
