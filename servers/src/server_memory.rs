//! # Memory Service (service 2)
//!
//! Each client picks a mode (`1` simple, `2` long) and a metric (`1`
//! available memory in MiB, `2` free memory percent). Simple mode answers
//! once; long mode polls the host every `--poll-interval-ms` and sends a
//! line whenever the value changes, until the client goes away.

mod service;
mod startup;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use lib_common::configs::config_sys::{MemoryServerConfig, MEMORY_SERVER_PORT};
use lib_common::protocols::memory::MemoryNegotiation;
use lib_common::utils::misc::sys_info::SystemMemory;

/// Tag on every log line of this service.
const SERVER_TAG: &str = "2";

#[tokio::main]
async fn main() -> Result<()> {
    let config = MemoryServerConfig::parse();
    let _guard = startup::init_diagnostics()?;

    let provider = Arc::new(SystemMemory::new());
    let poll_interval = config.poll_interval();
    service::run_tcp_service(
        &config.service,
        SERVER_TAG,
        MEMORY_SERVER_PORT,
        None,
        move |logger| MemoryNegotiation::new(provider, logger, poll_interval),
    )
    .await
}
