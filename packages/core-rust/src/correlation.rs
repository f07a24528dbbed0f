//! Correlation identifier shared by every call of one logical request chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 128-bit identifier for one end-to-end call chain.
///
/// Generated once at the edge and forwarded unchanged by every hop.
/// [`CorrelationId::EMPTY`] stands for "no correlation id was received".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// The nil id. Produced when a peer sends no correlation header.
    pub const EMPTY: Self = Self(Uuid::nil());

    /// Size of the binary wire form.
    pub const LEN: usize = 16;

    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Rebuilds an id from its 16-byte wire form.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Big-endian binary form used on the wire.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    /// Returns `true` for the [`CorrelationId::EMPTY`] sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for CorrelationId {
    /// Defaults to the empty sentinel, not a fresh id.
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
