//! Self-addressed control surface.
//!
//! Messages whose receiver is the router itself are parsed into a
//! [`ControlRequest`] and handled locally instead of being delivered.
//!
//! | Kind      | Payload key  | Values                      |
//! |-----------|--------------|-----------------------------|
//! | `request` | `operation`  | `get_routes`, `add_route`   |
//! | `command` | `command`    | `start`, `stop`             |
//! | `query`   | `query`      | `status`, `routes`          |
//!
//! A bare string payload is accepted in place of the keyed object.

use crate::core::{Error, Result};
use crate::mcp::message::{Message, MessageType};
use serde_json::{Map, Value};

/// A parsed control-surface request.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlRequest {
    /// Return the whole route table
    GetRoutes,
    /// Insert or overwrite a route
    AddRoute {
        source: String,
        destination: String,
        metadata: Map<String, Value>,
    },
    /// Start the queue processor
    Start,
    /// Stop the queue processor
    Stop,
    /// Report router status
    Status,
    /// Same as `GetRoutes`, as a query
    Routes,
}

fn name<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    match payload {
        Value::String(s) => Some(s.as_str()),
        other => other.get(key).and_then(Value::as_str),
    }
}

fn required_field(payload: &Value, key: &str) -> Result<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidPayload(format!("add_route requires '{}'", key)))
}

impl ControlRequest {
    /// Parse a self-addressed message.
    pub fn parse(message: &Message) -> Result<Self> {
        let payload = &message.payload;
        match message.message_type {
            MessageType::Request => match name(payload, "operation") {
                Some("get_routes") => Ok(ControlRequest::GetRoutes),
                Some("add_route") => Ok(ControlRequest::AddRoute {
                    source: required_field(payload, "source")?,
                    destination: required_field(payload, "destination")?,
                    metadata: payload
                        .get("metadata")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default(),
                }),
                other => Err(Error::UnsupportedOperation(
                    other.unwrap_or("<missing>").to_string(),
                )),
            },
            MessageType::Command => match name(payload, "command") {
                Some("start") => Ok(ControlRequest::Start),
                Some("stop") => Ok(ControlRequest::Stop),
                other => Err(Error::UnsupportedCommand(
                    other.unwrap_or("<missing>").to_string(),
                )),
            },
            MessageType::Query => match name(payload, "query") {
                Some("status") => Ok(ControlRequest::Status),
                Some("routes") => Ok(ControlRequest::Routes),
                other => Err(Error::UnsupportedQuery(
                    other.unwrap_or("<missing>").to_string(),
                )),
            },
            MessageType::Event | MessageType::Response | MessageType::Error => Err(
                Error::UnsupportedMessageType(message.message_type.to_string()),
            ),
        }
    }
}
