//! # Configuration Modules
//!
//! Command-line and environment configuration of the three binaries.

/// `clap` definitions, defaults and derived settings.
pub mod config_sys;
