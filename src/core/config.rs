//! Router configuration.

use crate::core::Result;
use crate::monitoring::logging::LoggerConfig;
use serde::{Deserialize, Serialize};

/// Default identity of a router on the mesh.
pub const DEFAULT_ROUTER_ID: &str = "mcp-router";

/// Router configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Identity appended to each hop path and used for self-addressed messages
    pub router_id: String,
    /// Optional ceiling on hop path length (None = unbounded)
    pub max_hops: Option<usize>,
    /// Logger configuration for the injected logger
    pub logging: LoggerConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            router_id: DEFAULT_ROUTER_ID.to_string(),
            max_hops: None,
            logging: LoggerConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Create a config for a router with the given id.
    pub fn new(router_id: &str) -> Self {
        Self {
            router_id: router_id.to_string(),
            ..Self::default()
        }
    }

    /// Set a hop ceiling.
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    /// Set the logger configuration.
    pub fn with_logging(mut self, logging: LoggerConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Deserialize from JSON. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
