//! # Colour Service (service 1)
//!
//! Accepts up to `--max-connections` clients at once. Each client sends one
//! colour name; a recognized name becomes the colour every later log
//! message of this process is painted in, and the client gets
//! `color changed` or `unsupported color` back.
//!
//! Log lines are printed locally and shipped through the log pipe to the
//! aggregator (`server_log`).

mod service;
mod startup;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use lib_common::configs::config_sys::{ColorServerConfig, COLOR_SERVER_PORT};
use lib_common::loggers::highlight::ColorState;
use lib_common::protocols::color::ColorNegotiation;

/// Tag on every log line of this service.
const SERVER_TAG: &str = "1";

#[tokio::main]
async fn main() -> Result<()> {
    let config = ColorServerConfig::parse();
    let _guard = startup::init_diagnostics()?;

    let colors = Arc::new(ColorState::default());
    service::run_tcp_service(
        &config.service,
        SERVER_TAG,
        COLOR_SERVER_PORT,
        Some(Arc::clone(&colors)),
        move |logger| ColorNegotiation::new(colors, logger),
    )
    .await
}
