//! Logging setup for taskhost
//!
//! All output goes to stderr: stdout belongs to the `serve` reply stream.

pub mod init;

pub use init::{build_filter, init_logging_from_config, init_simple_tracing};
