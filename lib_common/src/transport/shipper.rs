use std::io::Write;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::named_pipe::{LineSource, PipeError, PipeWriter};
use crate::loggers::logrecord::LogLine;

/// # Ship Outbound
///
/// Moves lines from the outbound queue into the FIFO, in queue order.
///
/// On shutdown the queue is closed and whatever is still buffered is written
/// before returning. An oversized line is skipped with a warning. Any other
/// write failure stops the shipper: the receiver is dropped, producers see a
/// closed queue from then on, and their lines still reach the console.
///
/// Returns the number of lines written.
pub async fn ship_outbound(
    mut queue: mpsc::Receiver<LogLine>,
    mut pipe: PipeWriter,
    shutdown: CancellationToken,
) -> Result<u64, PipeError> {
    let mut shipped = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(line) => {
                    if ship_one(&mut pipe, &line).await? {
                        shipped += 1;
                    }
                }
                None => break,
            },
        }
    }

    queue.close();
    while let Ok(line) = queue.try_recv() {
        if ship_one(&mut pipe, &line).await? {
            shipped += 1;
        }
    }

    info!(pipe = %pipe.path().display(), shipped, "log shipper stopped");
    Ok(shipped)
}

async fn ship_one(pipe: &mut PipeWriter, line: &LogLine) -> Result<bool, PipeError> {
    match pipe.write_line(line.as_bytes()).await {
        Ok(()) => Ok(true),
        Err(PipeError::Oversized(len)) => {
            warn!(bytes = len, "log line too long for an atomic pipe write, skipped");
            Ok(false)
        }
        Err(e) => {
            error!(pipe = %pipe.path().display(), error = %e, "log shipper failed");
            Err(e)
        }
    }
}

/// # Pump Inbound
///
/// The aggregator side: reads complete lines from the FIFO and forwards them
/// to the log writer's queue, optionally echoing each one on stdout.
///
/// Stops on shutdown, when the writer's queue is closed, or on a read error,
/// which is logged before it is returned. Returns the number of lines
/// forwarded.
pub async fn pump_inbound<R: LineSource>(
    mut reader: R,
    lines: mpsc::Sender<LogLine>,
    shutdown: CancellationToken,
    echo: bool,
) -> Result<u64, PipeError> {
    let mut forwarded = 0u64;

    loop {
        let batch = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            read = reader.read_lines() => match read {
                Ok(batch) => batch,
                Err(e) => {
                    error!(pipe = %reader.path().display(), error = %e, forwarded, "pipe reader stopped");
                    return Err(e);
                }
            },
        };

        for text in batch {
            if echo {
                let mut stdout = std::io::stdout().lock();
                if let Err(e) = stdout.write_all(text.as_bytes()) {
                    debug!(error = %e, "console echo failed");
                }
            }
            if lines.send(LogLine::new(text)).await.is_err() {
                info!(forwarded, "log writer queue closed, pump stopping");
                return Ok(forwarded);
            }
            forwarded += 1;
        }
    }

    info!(pipe = %reader.path().display(), forwarded, "pipe pump stopped");
    Ok(forwarded)
}
