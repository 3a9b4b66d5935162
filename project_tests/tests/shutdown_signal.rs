use std::time::{Duration, Instant};

use anyhow::Result;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use lib_common::core::shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownReason};
use lib_common::loggers::loggerpipe::{
    PipeLogger, PipeLoggerOptions, PublishError, OUTBOUND_QUEUE_CAPACITY,
};
use lib_common::transport::{create_fifo, ship_outbound, PipeReader, PipeWriter};
use lib_common::{Level, LogRecord};

/// Sends SIGTERM to this process until the coordinator reports it.
async fn terminate_self(coordinator: &ShutdownCoordinator) -> ShutdownReason {
    let sender = tokio::spawn(async {
        loop {
            let _ = kill(Pid::this(), Signal::SIGTERM);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });
    let reason = tokio::time::timeout(Duration::from_secs(5), coordinator.wait_for_signal())
        .await
        .expect("SIGTERM not observed");
    sender.abort();
    reason
}

/// A coordinator with a shipper on `pipe_path` and the logger feeding it.
fn service_pipeline(
    pipe_path: &std::path::Path,
    grace: Duration,
) -> Result<(ShutdownCoordinator, PipeLogger)> {
    let coordinator = ShutdownCoordinator::new(grace);
    let handle = coordinator.handle();
    let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    handle.spawn(ship_outbound(
        queue,
        PipeWriter::open(pipe_path)?,
        handle.token().clone(),
    ));
    let logger = PipeLogger::new(
        "2",
        outbound,
        handle.token().clone(),
        PipeLoggerOptions::default(),
    );
    Ok((coordinator, logger))
}

#[tokio::test]
async fn backed_up_pipe_does_not_hold_up_the_exit() -> Result<()> {
    let _listener = signal(SignalKind::terminate())?;
    let dir = tempfile::tempdir()?;
    let pipe_path = dir.path().join("log_pipe");
    create_fifo(&pipe_path, 0o600)?;

    let grace = Duration::from_millis(300);
    let (coordinator, logger) = service_pipeline(&pipe_path, grace)?;

    // No aggregator reads the pipe: it fills, the shipper blocks on its
    // write and the outbound queue stays full.
    let filler = "x".repeat(1000);
    let mut logged = 0;
    while tokio::time::timeout(
        Duration::from_millis(100),
        logger.log(Level::Info, &filler, &[]),
    )
    .await
    .is_ok()
    {
        logged += 1;
        assert!(logged < 10_000, "pipe never backed up");
    }

    assert_eq!(terminate_self(&coordinator).await, ShutdownReason::Terminate);
    let started = Instant::now();
    assert_eq!(
        logger.try_log(Level::Info, "Server down", &[]),
        Err(PublishError::QueueFull)
    );
    assert_eq!(coordinator.shutdown().await, ShutdownOutcome::TimedOut);
    assert!(
        started.elapsed() < grace + Duration::from_secs(1),
        "exit took {:?}",
        started.elapsed()
    );
    Ok(())
}

#[tokio::test]
async fn farewell_is_shipped_by_the_drain_pass() -> Result<()> {
    let _listener = signal(SignalKind::terminate())?;
    let dir = tempfile::tempdir()?;
    let pipe_path = dir.path().join("log_pipe");
    create_fifo(&pipe_path, 0o600)?;
    let mut reader = PipeReader::open(&pipe_path)?;

    let (coordinator, logger) = service_pipeline(&pipe_path, Duration::from_secs(2))?;
    logger.info("Server up", &[]).await;

    let reason = terminate_self(&coordinator).await;
    logger.try_log(Level::Info, "Server down", &[("reason", reason.to_string())])?;
    assert!(matches!(
        coordinator.shutdown().await,
        ShutdownOutcome::Graceful(_)
    ));

    let mut records = Vec::new();
    while records.len() < 2 {
        let lines = tokio::time::timeout(Duration::from_secs(2), reader.read_lines()).await??;
        for line in lines {
            records.push(line.parse::<LogRecord>()?);
        }
    }
    assert_eq!(records[0].message, "Server up");
    assert_eq!(records[1].message, "Server down");
    assert_eq!(
        records[1].attrs,
        vec![("reason".to_string(), "SIGTERM".to_string())]
    );
    Ok(())
}
