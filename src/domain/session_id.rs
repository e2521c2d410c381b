//! Type-safe session identifier.
//!
//! [`SessionId`] is an opaque string newtype. Internally issued ids are
//! UUID v4 strings; a transport may also hand in its own id, in which case
//! the registry rejects collisions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for one connected client.
///
/// Issued once on connect and immutable thereafter. Used as the key in
/// [`super::SessionRegistry`] and as the exclusion target for fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Issues a new random `SessionId` backed by a UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps an externally provided identifier.
    #[must_use]
    pub fn from_external(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
