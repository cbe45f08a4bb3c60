//! Database models for registry snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::RegistrySnapshot;
use crate::error::RegistryError;

/// A stored row from the `core_snapshots` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    /// Auto-increment row ID.
    pub id: i64,
    /// Number of cores in the snapshot.
    pub core_count: i32,
    /// Full [`RegistrySnapshot`] as JSONB.
    pub snapshot: serde_json::Value,
    /// Server-side insert timestamp.
    pub snapshot_at: DateTime<Utc>,
}

impl SnapshotRow {
    /// Decodes the stored JSON back into a [`RegistrySnapshot`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] if the payload no longer
    /// matches the snapshot schema.
    pub fn decode(self) -> Result<RegistrySnapshot, RegistryError> {
        serde_json::from_value(self.snapshot).map_err(|e| {
            RegistryError::Persistence(format!("snapshot row {} is unreadable: {e}", self.id))
        })
    }
}
