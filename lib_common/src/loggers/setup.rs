use thiserror::Error;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Level used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingSetupError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("a global tracing subscriber is already installed: {0}")]
    Init(#[from] TryInitError),
}

/// # Setup Logging
///
/// Installs the `tracing` subscriber used for operator diagnostics.
///
/// - The filter comes from `RUST_LOG`, falling back to `default_level`.
/// - Output goes to stderr through a non-blocking writer, leaving stdout to
///   the service's own log lines.
///
/// The returned guard flushes buffered diagnostics when dropped; keep it
/// alive in `main`.
pub fn setup_logging(default_level: &str) -> Result<WorkerGuard, LoggingSetupError> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let env_filter = build_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok(), default_level)?;
    let active = env_filter.to_string();

    let console_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()?;

    tracing::info!("Logging initialized with filter: {}", active);
    Ok(guard)
}

/// `RUST_LOG` directives when present and valid, otherwise `default_level`.
fn build_filter(from_env: Option<String>, default_level: &str) -> Result<EnvFilter, ParseError> {
    match from_env.as_deref().map(EnvFilter::try_new) {
        Some(Ok(filter)) => Ok(filter),
        _ => EnvFilter::try_new(default_level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_directives_win_over_the_default() {
        let filter = build_filter(Some("lib_common=trace".into()), DEFAULT_LOG_LEVEL).unwrap();
        assert!(filter.to_string().contains("lib_common"), "{filter}");
    }

    #[test]
    fn default_level_applies_without_env() {
        let filter = build_filter(None, DEFAULT_LOG_LEVEL).unwrap();
        let active = filter.to_string();
        assert!(!active.contains("lib_common"));
        assert!(active.to_lowercase().contains(DEFAULT_LOG_LEVEL), "{active}");
    }
}
