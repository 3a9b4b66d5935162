//! # Process Startup
//!
//! Environment loading, process identity and diagnostics setup shared by
//! every binary in this crate.

use static_init::dynamic;

use lib_common::loggers::setup::{setup_logging, LoggingSetupError, WorkerGuard, DEFAULT_LOG_LEVEL};
use lib_common::utils::misc::sys_info::{get_process_info, ProcessInfo, ProcessInfoError};

// load .env files before anything else
/// Initializes environment variables by loading `.env` files.
///
/// A generic `.env` is loaded first, then `.env.linux` (or `.env.windows`)
/// on top of it. Missing files are ignored.
#[allow(dead_code)]
#[dynamic]
static DOTENV_INIT: () = {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };

    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
};

/// Statically initialized `ProcessInfo` instance, providing details about the current process.
#[dynamic]
pub static PROCESSINFO: Result<ProcessInfo, ProcessInfoError> = get_process_info();

/// Installs operator diagnostics and returns the writer guard `main` must
/// hold until exit.
pub fn init_diagnostics() -> Result<WorkerGuard, LoggingSetupError> {
    let guard = setup_logging(DEFAULT_LOG_LEVEL)?;
    match &*PROCESSINFO {
        Ok(info) => tracing::info!("starting {}", info),
        Err(e) => tracing::warn!(error = %e, "process information unavailable"),
    }
    Ok(guard)
}

/// `(pid, host)` attributes for the `Server up` record.
pub fn identity_attrs() -> Vec<(&'static str, String)> {
    match &*PROCESSINFO {
        Ok(info) => vec![
            ("pid", info.process_pid.to_string()),
            ("host", info.process_host.clone()),
        ],
        Err(_) => vec![("pid", std::process::id().to_string())],
    }
}
