use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::{env, fmt};

use hostname::get;
use sysinfo::System;
use thiserror::Error;

use crate::protocols::memory::{MemoryProvider, ProviderError};

/// Bytes in one mebibyte.
pub const MIB: u64 = 1_048_576;

#[derive(Debug, Error)]
/// # Process Info Error
///
/// Errors that can occur while collecting process information.
pub enum ProcessInfoError {
    /// An I/O error occurred, typically when locating the executable.
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    /// The executable path has no usable file name.
    #[error("Failed to get the process basename from {0}")]
    Basename(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
/// # Process Information
///
/// Identity of the running service, stamped on its `Server up` record.
pub struct ProcessInfo {
    /// The base name of the executable (filename without extension).
    pub process_basename: String,
    /// The directory where the executable is located.
    pub process_location: String,
    /// The process ID (PID) of the current process.
    pub process_pid: u32,
    /// The hostname of the machine running the process.
    pub process_host: String,
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (pid {}) on {} from {}",
            self.process_basename, self.process_pid, self.process_host, self.process_location
        )
    }
}

/// # Get Process Information
///
/// Collects the executable name and location, the PID and the hostname.
/// A hostname that cannot be read is reported as `unknown` rather than
/// failing the whole lookup.
pub fn get_process_info() -> Result<ProcessInfo, ProcessInfoError> {
    let current_exe = env::current_exe()?;
    let process_basename = get_process_basename(&current_exe)?;
    let process_location = current_exe
        .parent()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_default();
    let process_host = match get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::debug!(error = %e, "hostname lookup failed");
            "unknown".to_string()
        }
    };

    Ok(ProcessInfo {
        process_basename,
        process_location,
        process_pid: std::process::id(),
        process_host,
    })
}

fn get_process_basename(exe_path: &Path) -> Result<String, ProcessInfoError> {
    exe_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_owned)
        .ok_or_else(|| ProcessInfoError::Basename(exe_path.to_path_buf()))
}

/// # System Memory
///
/// [`MemoryProvider`] over the host's memory statistics. Every call refreshes
/// the figures first.
pub struct SystemMemory {
    system: Mutex<System>,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Refreshes and returns `(available, total)` in bytes.
    fn snapshot(&self) -> Result<(u64, u64), ProviderError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(ProviderError::Unavailable(
                "total memory reported as zero".to_string(),
            ));
        }
        Ok((system.available_memory(), total))
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider for SystemMemory {
    fn available_memory_mib(&self) -> Result<u64, ProviderError> {
        let (available, _) = self.snapshot()?;
        Ok(available / MIB)
    }

    fn free_memory_percent(&self) -> Result<f64, ProviderError> {
        let (available, total) = self.snapshot()?;
        Ok(available as f64 / total as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_info_names_this_binary() {
        let info = get_process_info().unwrap();
        assert_eq!(info.process_pid, std::process::id());
        assert!(!info.process_basename.is_empty());
        assert!(info.to_string().contains(&info.process_basename));
    }

    #[test]
    fn basename_drops_the_extension() {
        assert_eq!(
            get_process_basename(Path::new("/opt/bin/server_color.exe")).unwrap(),
            "server_color"
        );
        assert!(matches!(
            get_process_basename(Path::new("/")),
            Err(ProcessInfoError::Basename(_))
        ));
    }

    #[test]
    fn host_memory_is_plausible() {
        let memory = SystemMemory::new();
        let pct = memory.free_memory_percent().unwrap();
        assert!((0.0..=100.0).contains(&pct));
        assert!(memory.available_memory_mib().is_ok());
    }
}
