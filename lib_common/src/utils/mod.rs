//! # Utilities Module
//!
//! Helpers that talk to the host rather than to clients.
//!
//! ## Contained Modules:
//!
//! - **`misc`**: process identity (`sys_info::get_process_info`) and the
//!   host-backed memory provider used by service 2 (`sys_info::SystemMemory`).

#![forbid(unsafe_code)]

/// Miscellaneous host helpers.
pub mod misc;

pub use misc::sys_info::{get_process_info, ProcessInfo, SystemMemory};
