use std::future::Future;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;

/// Largest write the kernel keeps atomic on a pipe (POSIX minimum, Linux value).
/// Lines up to this size never interleave with other writers' lines.
pub const PIPE_BUF: usize = 4096;

const READ_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("failed to open pipe {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} exists but is not a FIFO")]
    NotFifo(PathBuf),

    #[error("failed to create FIFO {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("line of {0} bytes exceeds the atomic pipe write size")]
    Oversized(usize),

    #[error("pipe write failed: {0}")]
    Write(#[source] io::Error),

    #[error("pipe read failed: {0}")]
    Read(#[source] io::Error),

    #[error("pipe closed")]
    Closed,
}

/// Creates a FIFO at `path` unless something already exists there.
///
/// Returns whether a new FIFO was made. The process umask applies to `mode`.
pub fn create_fifo(path: impl AsRef<Path>, mode: u32) -> Result<bool, PipeError> {
    let path = path.as_ref();
    if path.exists() {
        ensure_fifo(path)?;
        return Ok(false);
    }
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(mode)).map_err(|source| {
        PipeError::Create {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(true)
}

fn ensure_fifo(path: &Path) -> Result<(), PipeError> {
    let metadata = std::fs::metadata(path).map_err(|source| PipeError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if metadata.file_type().is_fifo() {
        Ok(())
    } else {
        Err(PipeError::NotFifo(path.to_path_buf()))
    }
}

fn open_options() -> pipe::OpenOptions {
    let mut options = pipe::OpenOptions::new();
    options.read_write(true);
    options
}

/// # Pipe Writer
///
/// The one writing handle a service process holds on the FIFO.
#[derive(Debug)]
pub struct PipeWriter {
    path: PathBuf,
    sender: pipe::Sender,
}

impl PipeWriter {
    /// Opens an existing FIFO for writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipeError> {
        let path = path.as_ref().to_path_buf();
        ensure_fifo(&path)?;
        let sender = open_options()
            .open_sender(&path)
            .map_err(|source| PipeError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, sender })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one complete line.
    ///
    /// Lines longer than [`PIPE_BUF`] are refused rather than split, since a
    /// split write could interleave with another process's line.
    pub async fn write_line(&mut self, line: &[u8]) -> Result<(), PipeError> {
        if line.len() > PIPE_BUF {
            return Err(PipeError::Oversized(line.len()));
        }
        self.sender.write_all(line).await.map_err(PipeError::Write)
    }
}

/// Where the aggregator's pump reads its lines from.
pub trait LineSource: Send {
    /// Identifies the source in diagnostics.
    fn path(&self) -> &Path;

    /// Resolves with the next batch of complete lines.
    fn read_lines(&mut self) -> impl Future<Output = Result<Vec<String>, PipeError>> + Send;
}

/// # Pipe Reader
///
/// The aggregator's reading handle. Bytes arrive in arbitrary chunks; the
/// reader hands out whole lines only and keeps any partial tail for the next
/// call.
#[derive(Debug)]
pub struct PipeReader {
    path: PathBuf,
    receiver: pipe::Receiver,
    pending: Vec<u8>,
    chunk: Vec<u8>,
}

impl PipeReader {
    /// Opens an existing FIFO for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipeError> {
        let path = path.as_ref().to_path_buf();
        ensure_fifo(&path)?;
        let receiver = open_options()
            .open_receiver(&path)
            .map_err(|source| PipeError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            receiver,
            pending: Vec::new(),
            chunk: vec![0; READ_CHUNK],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits until at least one complete line is available and returns all
    /// complete lines read so far, each with its trailing line break.
    ///
    /// "Would block" wake-ups are not errors; the call just keeps waiting.
    /// Cancel safe: dropping the future loses no bytes.
    pub async fn read_lines(&mut self) -> Result<Vec<String>, PipeError> {
        loop {
            self.receiver.readable().await.map_err(PipeError::Read)?;
            match self.receiver.try_read(&mut self.chunk) {
                Ok(0) => return Err(PipeError::Closed),
                Ok(n) => {
                    self.pending.extend_from_slice(&self.chunk[..n]);
                    let lines = self.take_lines();
                    if !lines.is_empty() {
                        return Ok(lines);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(PipeError::Read(e)),
            }
        }
    }

    fn take_lines(&mut self) -> Vec<String> {
        let Some(last_break) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.pending.drain(..=last_break).collect();
        complete
            .split_inclusive(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }
}

impl LineSource for PipeReader {
    fn path(&self) -> &Path {
        PipeReader::path(self)
    }

    fn read_lines(&mut self) -> impl Future<Output = Result<Vec<String>, PipeError>> + Send {
        PipeReader::read_lines(self)
    }
}
