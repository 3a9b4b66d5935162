//! # Durable Log Writer
//!
//! The aggregator's final stage. Lines arriving on a bounded queue are
//! appended to one log file; a data sync is issued after every `sync_every`
//! writes instead of after each line. On shutdown the writer takes one more
//! pass over whatever is still queued, writes it, and issues a final sync
//! before returning, so nothing accepted into the queue before the signal is
//! lost.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::logrecord::LogLine;

/// Writes between two durability syncs.
pub const DEFAULT_SYNC_EVERY: u64 = 10;

#[derive(Debug, Error)]
pub enum LogFileError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to append to log file: {0}")]
    Write(#[source] io::Error),

    #[error("failed to sync log file: {0}")]
    Sync(#[source] io::Error),
}

/// Counters reported when the writer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Lines appended successfully.
    pub written: u64,
    /// Of those, lines appended during the shutdown drain.
    pub drained: u64,
    /// Successful syncs, the final one included.
    pub syncs: u64,
    /// Appends or syncs that failed and were skipped.
    pub failures: u64,
}

/// # Durable Log Writer
///
/// Owns the append-mode handle of the aggregated log file.
pub struct DurableLogWriter {
    path: PathBuf,
    file: File,
    sync_every: u64,
    stats: WriterStats,
}

impl DurableLogWriter {
    /// Opens (creating if needed) `path` in append mode.
    ///
    /// A `sync_every` of zero is treated as one.
    pub async fn open(path: impl AsRef<Path>, sync_every: u64) -> Result<Self, LogFileError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o644)
            .open(&path)
            .await
            .map_err(|source| LogFileError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file,
            sync_every: sync_every.max(1),
            stats: WriterStats::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Appends one line, syncing when the batch is complete.
    pub async fn append(&mut self, line: &LogLine) -> Result<(), LogFileError> {
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(LogFileError::Write)?;
        self.stats.written += 1;

        if self.stats.written % self.sync_every == 0 {
            self.sync().await?;
        }
        Ok(())
    }

    /// Flushes file data to the storage device.
    pub async fn sync(&mut self) -> Result<(), LogFileError> {
        self.file.sync_data().await.map_err(LogFileError::Sync)?;
        self.stats.syncs += 1;
        Ok(())
    }

    /// Consumes `queue` until shutdown or until every sender is gone, then
    /// drains what is left and syncs.
    ///
    /// Individual write or sync failures are logged and counted; they do not
    /// stop the writer.
    pub async fn run(
        mut self,
        mut queue: mpsc::Receiver<LogLine>,
        shutdown: CancellationToken,
    ) -> WriterStats {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = queue.recv() => match next {
                    Some(line) => self.append_logged(&line).await,
                    None => break,
                },
            }
        }

        // No new lines from here on; whatever made it into the buffer is written.
        queue.close();
        let before = self.stats.written;
        while let Ok(line) = queue.try_recv() {
            self.append_logged(&line).await;
        }
        self.stats.drained = self.stats.written - before;

        if let Err(e) = self.sync().await {
            self.stats.failures += 1;
            error!(path = %self.path.display(), error = %e, "final sync failed");
        }
        info!(
            path = %self.path.display(),
            written = self.stats.written,
            drained = self.stats.drained,
            syncs = self.stats.syncs,
            "log writer stopped"
        );
        self.stats
    }

    async fn append_logged(&mut self, line: &LogLine) {
        if let Err(e) = self.append(line).await {
            self.stats.failures += 1;
            error!(path = %self.path.display(), error = %e, "dropping log line");
        } else {
            debug!(bytes = line.len(), "log line written");
        }
    }
}
