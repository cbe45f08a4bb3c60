//! Type-safe core identity.
//!
//! [`CoreId`] is a newtype wrapper around [`uuid::Uuid`] (v4). A core's
//! *name* can change (rename, swap); its `CoreId` never does, so identity
//! comparisons and the original-name map key on it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of one opened core instance.
///
/// Generated when a [`super::CoreHandle`] is constructed. A reload
/// produces a new handle and therefore a new `CoreId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreId(uuid::Uuid);

impl CoreId {
    /// Creates a new random `CoreId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for CoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for CoreId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}
