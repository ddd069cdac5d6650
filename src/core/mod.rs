//! Core utilities and common types for the MCP router.

pub mod config;
pub mod error;
pub mod types;

pub use config::RouterConfig;
pub use error::{Error, ErrorCode, Result};
pub use types::*;
