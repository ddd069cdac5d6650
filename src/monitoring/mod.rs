//! Monitoring for the MCP router.
//!
//! Structured, per-router logging forwarded to `tracing`.

pub mod logging;

pub use logging::{init_tracing, LogEntry, LogFormat, LogLevel, Logger, LoggerConfig};
