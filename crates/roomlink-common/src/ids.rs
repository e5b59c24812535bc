//! Identifier generation.
//!
//! Session, stream and subscription ids are UUID v7 based: time-sortable and
//! unique across nodes without coordination, so ids never collide while a
//! session is live.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new opaque id using UUID v7 (simple, hyphen-free form).
pub fn generate_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Identifier of one call session, also used as the participant id on the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Id for a call that arrived from the SIP side.
    pub fn incoming() -> Self {
        Self(format!("SipIn{}", generate_id()))
    }

    /// Id for a call placed by this gateway.
    pub fn outgoing() -> Self {
        Self(format!("SipOut{}", generate_id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_id();
        let id2 = generate_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 32);
    }

    #[test]
    fn test_ids_are_time_sortable() {
        let id1 = generate_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = generate_id();
        assert!(id1 < id2);
    }

    #[test]
    fn test_client_id_prefixes() {
        assert!(ClientId::incoming().as_str().starts_with("SipIn"));
        assert!(ClientId::outgoing().as_str().starts_with("SipOut"));
        assert_ne!(ClientId::incoming(), ClientId::incoming());
    }
}
