//! Discovery port.
//!
//! The router reaches components only through a [`DiscoveryPort`]. The port
//! is shared, externally owned and read-only from the router's side.

use crate::core::Result;
use crate::mcp::message::Message;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Raw result returned by a component.
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentOutput {
    /// Already a structured message; passed through as-is
    Message(Message),
    /// Raw value; the router wraps it into a `response`
    Value(Value),
}

impl From<Message> for ComponentOutput {
    fn from(message: Message) -> Self {
        ComponentOutput::Message(message)
    }
}

impl From<Value> for ComponentOutput {
    fn from(value: Value) -> Self {
        ComponentOutput::Value(value)
    }
}

/// A component reachable on the mesh.
pub trait Component: Send + Sync {
    /// Component ID.
    fn id(&self) -> &str;

    /// Declared component type, used for broadcast.
    fn component_type(&self) -> &str;

    /// Process a message synchronously.
    fn process_message(&self, message: Message) -> Result<ComponentOutput>;

    /// Non-blocking variant, if the component has one. Preferred by the router.
    fn as_async(&self) -> Option<&dyn AsyncComponent> {
        None
    }
}

/// Non-blocking processing capability of a component.
#[async_trait]
pub trait AsyncComponent: Send + Sync {
    /// Process a message without blocking the caller.
    async fn process_message_async(&self, message: Message) -> Result<ComponentOutput>;
}

/// Lookup capability consumed by the router.
pub trait DiscoveryPort: Send + Sync {
    /// Find a component by id.
    fn get_component(&self, id: &str) -> Option<Arc<dyn Component>>;

    /// Find all components of a type, in enumeration order.
    fn find_components_by_type(&self, component_type: &str) -> Vec<Arc<dyn Component>>;
}

/// Thread-safe in-memory discovery keeping registration order.
#[derive(Default)]
pub struct InMemoryDiscovery {
    components: RwLock<Vec<Arc<dyn Component>>>,
}

impl InMemoryDiscovery {
    /// Create an empty discovery service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. Re-registering an id replaces it in place.
    pub fn register(&self, component: Arc<dyn Component>) {
        if let Ok(mut components) = self.components.write() {
            match components.iter().position(|c| c.id() == component.id()) {
                Some(index) => components[index] = component,
                None => components.push(component),
            }
        }
    }

    /// Remove a component by id.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Component>> {
        let mut components = self.components.write().ok()?;
        let index = components.iter().position(|c| c.id() == id)?;
        Some(components.remove(index))
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Whether no component is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiscoveryPort for InMemoryDiscovery {
    fn get_component(&self, id: &str) -> Option<Arc<dyn Component>> {
        let components = self.components.read().ok()?;
        let found = components.iter().find(|c| c.id() == id).cloned();
        found
    }

    fn find_components_by_type(&self, component_type: &str) -> Vec<Arc<dyn Component>> {
        self.components
            .read()
            .map(|components| {
                components
                    .iter()
                    .filter(|c| c.component_type() == component_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Processing function of a [`FnComponent`].
pub type ProcessFn = Arc<dyn Fn(Message) -> Result<ComponentOutput> + Send + Sync>;

/// Component backed by a closure.
pub struct FnComponent {
    id: String,
    component_type: String,
    process: ProcessFn,
}

impl FnComponent {
    /// Create a closure-backed component.
    pub fn new<F>(id: &str, component_type: &str, process: F) -> Self
    where
        F: Fn(Message) -> Result<ComponentOutput> + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            component_type: component_type.to_string(),
            process: Arc::new(process),
        }
    }

    /// Component that answers every message with a fixed value.
    pub fn constant(id: &str, component_type: &str, value: Value) -> Self {
        Self::new(id, component_type, move |_| Ok(ComponentOutput::Value(value.clone())))
    }
}

impl Component for FnComponent {
    fn id(&self) -> &str {
        &self.id
    }

    fn component_type(&self) -> &str {
        &self.component_type
    }

    fn process_message(&self, message: Message) -> Result<ComponentOutput> {
        (self.process)(message)
    }
}
