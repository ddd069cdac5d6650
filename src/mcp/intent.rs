//! Intent resolution.
//!
//! An intent is a content-independent label on a message (e.g. `"diagnose"`)
//! that a resolver maps to a concrete component id at routing time.
//! [`CapabilityIndex`] provides a ready-made resolver that picks the best
//! available component by score and load.

use crate::mcp::message::Message;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Maps a message carrying an intent to a destination component id.
pub type IntentResolver = Arc<dyn Fn(&Message) -> Option<String> + Send + Sync>;

/// Registry of intent resolvers, one per intent string.
#[derive(Clone, Default)]
pub struct IntentRegistry {
    resolvers: HashMap<String, IntentResolver>,
}

impl IntentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver, replacing any previous one for the intent.
    pub fn register(&mut self, intent: &str, resolver: IntentResolver) -> Option<IntentResolver> {
        self.resolvers.insert(intent.to_string(), resolver)
    }

    /// Remove the resolver for an intent.
    pub fn unregister(&mut self, intent: &str) -> Option<IntentResolver> {
        self.resolvers.remove(intent)
    }

    /// Resolver for an intent.
    pub fn get(&self, intent: &str) -> Option<IntentResolver> {
        self.resolvers.get(intent).cloned()
    }

    /// Number of registered intents.
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Whether no intent is registered.
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Registered intent names.
    pub fn intents(&self) -> Vec<&String> {
        self.resolvers.keys().collect()
    }
}

impl std::fmt::Debug for IntentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentRegistry")
            .field("intents", &self.intents())
            .finish()
    }
}

/// Capability descriptor of a component that can serve intents.
#[derive(Clone, Debug)]
pub struct Capability {
    /// Component ID
    pub component_id: String,
    /// Intents the component serves
    pub intents: Vec<String>,
    /// Capability score (0.0 - 1.0)
    pub score: f32,
    /// Whether the component is currently available
    pub available: bool,
    /// Load factor (0.0 = idle, 1.0 = fully loaded)
    pub load: f32,
}

impl Capability {
    /// Create a new capability for a component.
    pub fn new(component_id: &str) -> Self {
        Self {
            component_id: component_id.to_string(),
            intents: Vec::new(),
            score: 1.0,
            available: true,
            load: 0.0,
        }
    }

    /// Add a served intent.
    pub fn with_intent(mut self, intent: &str) -> Self {
        self.intents.push(intent.to_string());
        self
    }

    /// Set capability score.
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }

    /// Check if the component serves an intent.
    pub fn serves(&self, intent: &str) -> bool {
        self.intents.iter().any(|i| i == intent)
    }

    /// Match score for an intent (0.0 = cannot serve).
    pub fn match_score(&self, intent: &str) -> f32 {
        if !self.available || !self.serves(intent) {
            return 0.0;
        }
        self.score * (1.0 - self.load)
    }
}

/// Capability index that resolves intents to the best-scoring component.
#[derive(Debug, Default)]
pub struct CapabilityIndex {
    capabilities: RwLock<HashMap<String, Capability>>,
}

impl CapabilityIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a component's capability.
    pub fn register(&self, capability: Capability) {
        if let Ok(mut caps) = self.capabilities.write() {
            caps.insert(capability.component_id.clone(), capability);
        }
    }

    /// Remove a component.
    pub fn unregister(&self, component_id: &str) {
        if let Ok(mut caps) = self.capabilities.write() {
            caps.remove(component_id);
        }
    }

    /// Update component availability.
    pub fn set_availability(&self, component_id: &str, available: bool) {
        if let Ok(mut caps) = self.capabilities.write() {
            if let Some(cap) = caps.get_mut(component_id) {
                cap.available = available;
            }
        }
    }

    /// Update component load.
    pub fn set_load(&self, component_id: &str, load: f32) {
        if let Ok(mut caps) = self.capabilities.write() {
            if let Some(cap) = caps.get_mut(component_id) {
                cap.load = load.clamp(0.0, 1.0);
            }
        }
    }

    /// Best component for an intent. Ties break on component id.
    pub fn best_for(&self, intent: &str) -> Option<String> {
        let caps = self.capabilities.read().ok()?;
        let best = caps
            .values()
            .map(|cap| (cap.match_score(intent), &cap.component_id))
            .filter(|(score, _)| *score > 0.0)
            .max_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.1.cmp(a.1))
            })
            .map(|(_, id)| id.clone());
        best
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.capabilities.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a resolver backed by this index. Later index updates are seen
    /// by the resolver.
    pub fn resolver(self: &Arc<Self>) -> IntentResolver {
        let index = Arc::clone(self);
        Arc::new(move |message: &Message| {
            message.intent().and_then(|intent| index.best_for(intent))
        })
    }
}
