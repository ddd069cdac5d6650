//! Common types used across router modules.

use uuid::Uuid;

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a component or router on the mesh.
pub type ComponentId = String;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Generate a fresh message identifier.
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
