//! Mesh Communication Protocol (MCP)
//!
//! Message routing between mesh components:
//! - Message envelope, kinds and validity checks
//! - Direct routes, intent resolvers and type broadcast
//! - Per-kind handlers and per-content-type codecs
//! - Self-addressed control surface and background queue

pub mod compression;
pub mod control;
pub mod discovery;
pub mod handlers;
pub mod intent;
pub mod message;
pub mod queue;
pub mod router;
pub mod routes;

pub use compression::{lz4_codec, Codec, CodecRegistry, SemanticCompressor};
pub use control::ControlRequest;
pub use discovery::{
    AsyncComponent, Component, ComponentOutput, DiscoveryPort, FnComponent, InMemoryDiscovery,
};
pub use handlers::{Handler, HandlerRegistry};
pub use intent::{Capability, CapabilityIndex, IntentRegistry, IntentResolver};
pub use message::{Message, MessageType};
pub use queue::{QueueConsumer, QueueProcessor};
pub use router::{MeshRouter, RouterBuilder, RouterMetrics, RouterStatus, Routed, Validator};
pub use routes::{Route, RouteTable};
