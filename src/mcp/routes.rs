//! Direct route table.
//!
//! Maps `(source, destination)` pairs to route metadata. Routes are
//! directional and never expire.

use crate::core::{now, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A direct route between two components.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Source component
    pub source: String,
    /// Destination component
    pub destination: String,
    /// Free-form route metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// When the route was (last) added
    pub created: Timestamp,
}

impl Route {
    /// Create a new route.
    pub fn new(source: &str, destination: &str, metadata: Map<String, Value>) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            metadata,
            created: now(),
        }
    }
}

/// Route table keyed by `(source, destination)`.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<(String, String), Route>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a route.
    pub fn add(&mut self, source: &str, destination: &str, metadata: Map<String, Value>) -> Route {
        let route = Route::new(source, destination, metadata);
        self.routes
            .insert((source.to_string(), destination.to_string()), route.clone());
        route
    }

    /// Look up a route.
    pub fn get(&self, source: &str, destination: &str) -> Option<&Route> {
        self.routes
            .get(&(source.to_string(), destination.to_string()))
    }

    /// Whether a route exists.
    pub fn contains(&self, source: &str, destination: &str) -> bool {
        self.get(source, destination).is_some()
    }

    /// Remove a route.
    pub fn remove(&mut self, source: &str, destination: &str) -> Option<Route> {
        self.routes
            .remove(&(source.to_string(), destination.to_string()))
    }

    /// All routes, ordered by `(source, destination)`.
    pub fn all(&self) -> Vec<Route> {
        self.routes.values().cloned().collect()
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
