//! # TCP Service Runner
//!
//! The lifecycle both TCP services share:
//!
//! 1. Open the log pipe and start the shipper.
//! 2. Build the pipe logger and the protocol handler.
//! 3. Bind, log `Server up`, run the accept loop.
//! 4. On SIGINT/SIGTERM queue `Server down` without waiting, cancel, and
//!    drain within the grace period. The shipper's drain pass carries the
//!    farewell to the pipe; a backed-up pipe costs the farewell, never the
//!    exit.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info};

use lib_common::Level;

use lib_common::configs::config_sys::ServiceConfig;
use lib_common::core::admission::{AdmissionController, ConnectionHandler};
use lib_common::core::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use lib_common::loggers::highlight::ColorState;
use lib_common::loggers::loggerpipe::{PipeLogger, PipeLoggerOptions, OUTBOUND_QUEUE_CAPACITY};
use lib_common::transport::{ship_outbound, PipeWriter};

use crate::startup::identity_attrs;

/// Runs one TCP service until shutdown.
///
/// # Arguments
/// * `config` - Shared service settings.
/// * `tag` - Value of `server=` on every log line.
/// * `default_port` - Port used when none is configured.
/// * `highlight` - Colour state painting the log messages, if any.
/// * `build` - Makes the connection handler from the shared logger.
pub async fn run_tcp_service<H, F>(
    config: &ServiceConfig,
    tag: &str,
    default_port: u16,
    highlight: Option<Arc<ColorState>>,
    build: F,
) -> Result<()>
where
    H: ConnectionHandler,
    F: FnOnce(Arc<PipeLogger>) -> H,
{
    info!("{}", config);
    let coordinator = ShutdownCoordinator::new(config.grace());
    let handle = coordinator.handle();

    let pipe = PipeWriter::open(&config.pipe_path)
        .with_context(|| format!("opening log pipe {}", config.pipe_path.display()))?;
    let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    handle.spawn(ship_outbound(queue, pipe, handle.token().clone()));

    let logger = Arc::new(PipeLogger::new(
        tag,
        outbound,
        handle.token().clone(),
        PipeLoggerOptions {
            use_tty: !config.no_tty,
            highlight,
        },
    ));

    let addr = config.listen_addr(default_port);
    let controller = match AdmissionController::bind(&addr, config.admission_options()).await {
        Ok(controller) => controller,
        Err(e) => {
            let _ = logger.try_log(
                Level::Error,
                "error while starting listening",
                &[("err", e.to_string())],
            );
            drop(handle);
            coordinator.shutdown().await;
            return Err(e).with_context(|| format!("binding {addr}"));
        }
    };
    let local = controller.local_addr()?;

    let mut attrs = vec![("addr", local.to_string())];
    attrs.extend(identity_attrs());
    logger.info("Server up", &attrs).await;

    let handler = Arc::new(build(Arc::clone(&logger)));
    handle.spawn(controller.serve(handler, handle.clone()));
    drop(handle);

    let reason = coordinator.wait_for_signal().await;
    let farewell = [("reason", reason.to_string())];
    if let Err(e) = logger.try_log(Level::Info, "Server down", &farewell) {
        info!(reason = %e, "farewell record stays local");
    }
    drop(logger);

    match coordinator.shutdown().await {
        ShutdownOutcome::Graceful(elapsed) => {
            info!(elapsed_ms = elapsed.as_millis() as u64, "{} stopped", tag)
        }
        ShutdownOutcome::TimedOut => {
            error!("{} stopped with connections still open", tag)
        }
    }
    Ok(())
}
