//! # MCP Router - Mesh Communication Protocol router
//!
//! Addressing, routing and dispatch between components of a mesh:
//! - **Routing**: direct routes, intent resolution, explicit receivers and
//!   broadcast by component type
//! - **Dispatch**: per-kind handlers behind a single JSON ingress
//! - **Compression**: per-content-type payload codecs around delivery
//! - **Queue**: background processing decoupled from arrival
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcp_router::core::RouterConfig;
//! use mcp_router::mcp::{FnComponent, InMemoryDiscovery, Message, MeshRouter};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let discovery = Arc::new(InMemoryDiscovery::new());
//!     discovery.register(Arc::new(FnComponent::constant("B", "service", json!("pong"))));
//!
//!     let router = MeshRouter::with_discovery(RouterConfig::new("router"), discovery);
//!     let reply = router.send(Message::request("A", "B", json!("ping"))).await;
//!     println!("{:?}", reply);
//! }
//! ```

pub mod core;
pub mod mcp;
pub mod monitoring;

pub use core::error::{Error, ErrorCode, Result};
pub use core::RouterConfig;
pub use mcp::{Message, MessageType, MeshRouter, Routed};
