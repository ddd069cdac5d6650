//! Message-type handler registry.
//!
//! One handler slot per [`MessageType`]; registering again replaces the
//! previous handler.

use crate::core::Result;
use crate::mcp::message::{Message, MessageType};
use std::sync::Arc;

/// A handler for one message kind.
///
/// Returning `Ok(None)` means "processed, nothing to say"; the router then
/// answers with an implicit acknowledgement.
pub type Handler = Arc<dyn Fn(&Message) -> Result<Option<Message>> + Send + Sync>;

/// Handler table with one slot per message kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    request: Option<Handler>,
    response: Option<Handler>,
    event: Option<Handler>,
    command: Option<Handler>,
    query: Option<Handler>,
    error: Option<Handler>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, message_type: MessageType) -> &mut Option<Handler> {
        match message_type {
            MessageType::Request => &mut self.request,
            MessageType::Response => &mut self.response,
            MessageType::Event => &mut self.event,
            MessageType::Command => &mut self.command,
            MessageType::Query => &mut self.query,
            MessageType::Error => &mut self.error,
        }
    }

    /// Handler registered for a kind.
    pub fn get(&self, message_type: MessageType) -> Option<Handler> {
        let slot = match message_type {
            MessageType::Request => &self.request,
            MessageType::Response => &self.response,
            MessageType::Event => &self.event,
            MessageType::Command => &self.command,
            MessageType::Query => &self.query,
            MessageType::Error => &self.error,
        };
        slot.clone()
    }

    /// Register a handler, replacing any previous one.
    pub fn register(&mut self, message_type: MessageType, handler: Handler) -> Option<Handler> {
        self.slot_mut(message_type).replace(handler)
    }

    /// Remove the handler for a kind.
    pub fn unregister(&mut self, message_type: MessageType) -> Option<Handler> {
        self.slot_mut(message_type).take()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        MessageType::ALL
            .iter()
            .filter(|t| self.get(**t).is_some())
            .count()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<_> = MessageType::ALL
            .iter()
            .filter(|t| self.get(**t).is_some())
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("registered", &registered)
            .finish()
    }
}
