//! Session identifier type.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// Opaque identifier for a remote shell session.
///
/// Backed by a random (v4) UUID, so ids are unguessable and never reused
/// within or across process lifetimes. Displayed as 32 lowercase hex
/// digits without dashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying 128-bit value.
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    /// Create a SessionId from a raw value.
    ///
    /// This is primarily for testing.
    pub fn from_raw(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for SessionId {
    type Err = crate::error::BridgeError;

    /// Accepts the simple (dashless) and hyphenated forms. Anything else is
    /// reported as an unknown session rather than a parse error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(SessionId)
            .map_err(|_| crate::error::BridgeError::SessionNotFound(s.into()))
    }
}
