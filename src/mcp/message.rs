//! Mesh message data contract.
//!
//! Defines the addressable unit the router operates on, its closed set of
//! message kinds, and constructors for responses and structured errors.

use crate::core::{new_message_id, now, Error, ErrorCode, Result, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;

/// Metadata key naming a logical intent.
pub const META_INTENT: &str = "intent";
/// Metadata key naming the payload content type.
pub const META_CONTENT_TYPE: &str = "content_type";
/// Metadata key naming a component type to broadcast to.
pub const META_TARGET_TYPE: &str = "target_type";
/// Metadata key flagging a compressed payload.
pub const META_COMPRESSED: &str = "compressed";
/// Metadata key correlating a reply with the request it answers.
pub const META_REQUEST_ID: &str = "request_id";

/// Message kinds understood by the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Request expecting a response
    Request,
    /// Response to a request
    Response,
    /// Fire-and-forget notification
    Event,
    /// Instruction to perform an action
    Command,
    /// Read-only question
    Query,
    /// Structured failure report
    Error,
}

impl MessageType {
    /// All message kinds, in declaration order.
    pub const ALL: [MessageType; 6] = [
        MessageType::Request,
        MessageType::Response,
        MessageType::Event,
        MessageType::Command,
        MessageType::Query,
        MessageType::Error,
    ];

    /// Get the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::Command => "command",
            MessageType::Query => "query",
            MessageType::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnsupportedMessageType(s.to_string()))
    }
}

/// A mesh protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID
    pub message_id: String,
    /// Message kind
    pub message_type: MessageType,
    /// Originating component
    pub sender_id: String,
    /// Destination component, if known
    #[serde(default)]
    pub receiver_id: Option<String>,
    /// Payload (opaque unless a codec applies)
    #[serde(default)]
    pub payload: Value,
    /// Open key/value metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Routers this message has passed through
    #[serde(default)]
    pub hop_path: Vec<String>,
    /// Creation timestamp
    #[serde(default = "now")]
    pub timestamp: Timestamp,
}

impl Message {
    /// Create a new message with a fresh id.
    pub fn new(message_type: MessageType, sender_id: &str) -> Self {
        Self {
            message_id: new_message_id(),
            message_type,
            sender_id: sender_id.to_string(),
            receiver_id: None,
            payload: Value::Null,
            metadata: Map::new(),
            hop_path: Vec::new(),
            timestamp: now(),
        }
    }

    /// Create a request addressed to a receiver.
    pub fn request(sender_id: &str, receiver_id: &str, payload: Value) -> Self {
        Self::new(MessageType::Request, sender_id)
            .with_receiver(receiver_id)
            .with_payload(payload)
    }

    /// Set the receiver.
    pub fn with_receiver(mut self, receiver_id: &str) -> Self {
        self.receiver_id = Some(receiver_id.to_string());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Tag the message with an intent.
    pub fn with_intent(self, intent: &str) -> Self {
        self.with_metadata(META_INTENT, json!(intent))
    }

    /// Tag the payload content type.
    pub fn with_content_type(self, content_type: &str) -> Self {
        self.with_metadata(META_CONTENT_TYPE, json!(content_type))
    }

    /// Tag a component type to broadcast to.
    pub fn with_target_type(self, target_type: &str) -> Self {
        self.with_metadata(META_TARGET_TYPE, json!(target_type))
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Intent label, if any.
    pub fn intent(&self) -> Option<&str> {
        self.meta_str(META_INTENT)
    }

    /// Content type, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.meta_str(META_CONTENT_TYPE)
    }

    /// Broadcast target type, if any.
    pub fn target_type(&self) -> Option<&str> {
        self.meta_str(META_TARGET_TYPE)
    }

    /// Request this message answers, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.meta_str(META_REQUEST_ID)
    }

    /// Whether the payload is currently compressed.
    pub fn is_compressed(&self) -> bool {
        self.metadata
            .get(META_COMPRESSED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Record the compression state of the payload.
    pub fn set_compressed(&mut self, compressed: bool) {
        self.metadata
            .insert(META_COMPRESSED.to_string(), Value::Bool(compressed));
    }

    /// Append a hop.
    pub fn push_hop(&mut self, hop: &str) {
        self.hop_path.push(hop.to_string());
    }

    /// Build a response to `original`, sent by `sender_id`.
    pub fn response(original: &Message, sender_id: &str, payload: Value) -> Self {
        Self {
            message_id: new_message_id(),
            message_type: MessageType::Response,
            sender_id: sender_id.to_string(),
            receiver_id: Some(original.sender_id.clone()),
            payload,
            metadata: reply_metadata(original),
            hop_path: original.hop_path.clone(),
            timestamp: now(),
        }
    }

    /// Build a structured error addressed back to the sender of `original`.
    pub fn error(original: &Message, sender_id: &str, code: ErrorCode, message: &str) -> Self {
        Self {
            message_id: new_message_id(),
            message_type: MessageType::Error,
            sender_id: sender_id.to_string(),
            receiver_id: Some(original.sender_id.clone()),
            payload: error_payload(code, message, Some(&original.message_id)),
            metadata: reply_metadata(original),
            hop_path: original.hop_path.clone(),
            timestamp: now(),
        }
    }

    /// Build a structured error that has no originating message.
    pub fn detached_error(sender_id: &str, code: ErrorCode, message: &str) -> Self {
        Self {
            payload: error_payload(code, message, None),
            ..Self::new(MessageType::Error, sender_id)
        }
    }

    /// Build a structured error from a router error.
    pub fn from_error(original: &Message, sender_id: &str, err: &Error) -> Self {
        Self::error(original, sender_id, err.code(), &err.to_string())
    }

    /// Error code carried by an `error` message.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.message_type != MessageType::Error {
            return None;
        }
        self.payload
            .get("code")
            .and_then(|c| serde_json::from_value(c.clone()).ok())
    }

    /// Whether this is an `error` message.
    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert into a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn reply_metadata(original: &Message) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        META_REQUEST_ID.to_string(),
        Value::String(original.message_id.clone()),
    );
    metadata
}

fn error_payload(code: ErrorCode, message: &str, message_id: Option<&str>) -> Value {
    json!({
        "code": code,
        "message": message,
        "message_id": message_id,
    })
}

/// Default validity check applied before routing.
///
/// A message needs a non-empty id and sender, and a receiver that is not
/// the empty string when present.
pub fn default_validator(message: &Message) -> std::result::Result<(), String> {
    if message.message_id.trim().is_empty() {
        return Err("message_id is empty".to_string());
    }
    if message.sender_id.trim().is_empty() {
        return Err("sender_id is empty".to_string());
    }
    if matches!(message.receiver_id.as_deref(), Some(r) if r.trim().is_empty()) {
        return Err("receiver_id is empty".to_string());
    }
    Ok(())
}
