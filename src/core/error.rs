//! Error types for the MCP router.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level error codes carried inside `error` messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidMessage,
    RoutingError,
    DeliveryError,
    ComponentNotFound,
    NoDiscoveryService,
    ProcessingError,
    InvalidPayload,
    UnsupportedOperation,
    UnsupportedCommand,
    UnsupportedQuery,
    UnsupportedMessageType,
}

impl ErrorCode {
    /// Get the snake_case code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "invalid_message",
            ErrorCode::RoutingError => "routing_error",
            ErrorCode::DeliveryError => "delivery_error",
            ErrorCode::ComponentNotFound => "component_not_found",
            ErrorCode::NoDiscoveryService => "no_discovery_service",
            ErrorCode::ProcessingError => "processing_error",
            ErrorCode::InvalidPayload => "invalid_payload",
            ErrorCode::UnsupportedOperation => "unsupported_operation",
            ErrorCode::UnsupportedCommand => "unsupported_command",
            ErrorCode::UnsupportedQuery => "unsupported_query",
            ErrorCode::UnsupportedMessageType => "unsupported_message_type",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while routing a message.
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(String),

    // Routing errors
    #[error("No route for message {0}")]
    NoRoute(String),

    #[error("Hop limit of {limit} reached for message {message_id}")]
    HopLimitExceeded { message_id: String, limit: usize },

    #[error("Message {0} has no receiver")]
    MissingReceiver(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("No discovery service configured")]
    NoDiscoveryService,

    // Component errors
    #[error("Component {component} failed: {reason}")]
    ComponentFailed { component: String, reason: String },

    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    // Compression errors
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    // Control surface errors
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    // Lifecycle errors
    #[error("Queue processor needs a running tokio runtime")]
    NoRuntime,

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Map this error onto its wire-level code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidMessage(_) => ErrorCode::InvalidMessage,
            Error::UnsupportedMessageType(_) => ErrorCode::UnsupportedMessageType,
            Error::NoRoute(_) | Error::HopLimitExceeded { .. } => ErrorCode::RoutingError,
            Error::MissingReceiver(_) => ErrorCode::DeliveryError,
            Error::ComponentNotFound(_) => ErrorCode::ComponentNotFound,
            Error::NoDiscoveryService => ErrorCode::NoDiscoveryService,
            Error::ComponentFailed { .. }
            | Error::HandlerFailed(_)
            | Error::CompressionFailed(_)
            | Error::DecompressionFailed(_)
            | Error::NoRuntime
            | Error::SerializationError(_) => ErrorCode::ProcessingError,
            Error::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Error::UnsupportedOperation(_) => ErrorCode::UnsupportedOperation,
            Error::UnsupportedCommand(_) => ErrorCode::UnsupportedCommand,
            Error::UnsupportedQuery(_) => ErrorCode::UnsupportedQuery,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
