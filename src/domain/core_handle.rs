//! Loaded core combining the external index resource with registry metadata.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::{CoreDescriptor, CoreId, IndexCore};
use crate::error::{CoreError, RegistryError};

/// Aggregate wrapping an opened [`IndexCore`] with its identity and
/// descriptor.
///
/// Shared as `Arc<CoreHandle>`; the registry decides which collection owns
/// it. The name and descriptor only change through
/// [`CoreHandle::set_name`], which is crate-private and called from inside
/// the registry lock while the entry is re-keyed.
#[derive(Debug)]
pub struct CoreHandle {
    id: CoreId,
    name: RwLock<String>,
    descriptor: RwLock<CoreDescriptor>,
    resource: Box<dyn IndexCore>,
    opened_at: DateTime<Utc>,
}

impl CoreHandle {
    /// Wraps a freshly opened resource. The handle takes its name from the
    /// descriptor.
    #[must_use]
    pub fn new(descriptor: CoreDescriptor, resource: Box<dyn IndexCore>) -> Self {
        Self {
            id: CoreId::new(),
            name: RwLock::new(descriptor.name.clone()),
            descriptor: RwLock::new(descriptor),
            resource,
            opened_at: Utc::now(),
        }
    }

    /// Stable identity.
    #[must_use]
    pub const fn id(&self) -> CoreId {
        self.id
    }

    /// Current name.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Returns `true` if the core is currently named `name`.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        *self.name.read() == name
    }

    /// Snapshot of the owning descriptor.
    #[must_use]
    pub fn descriptor(&self) -> CoreDescriptor {
        self.descriptor.read().clone()
    }

    /// Data directory reported by the resource.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.resource.data_dir().to_path_buf()
    }

    /// When the resource was opened.
    #[must_use]
    pub const fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Renames the core and its descriptor together.
    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
        let renamed = self.descriptor.read().renamed(name);
        *self.descriptor.write() = renamed;
    }

    /// Closes the resource on the calling thread.
    ///
    /// # Errors
    ///
    /// Propagates the resource's [`CoreError`].
    pub fn close(&self) -> Result<(), CoreError> {
        self.resource.close()
    }
}

/// Closes `core` on the blocking pool so callers never block an async
/// worker thread on I/O.
///
/// # Errors
///
/// Returns [`RegistryError::Close`] if the resource failed to close or the
/// blocking task panicked.
pub async fn close_off_thread(core: Arc<CoreHandle>) -> Result<(), RegistryError> {
    let name = core.name();
    let outcome = tokio::task::spawn_blocking(move || core.close())
        .await
        .map_err(|e| CoreError::Other(format!("close task failed: {e}")))
        .and_then(|res| res);
    outcome.map_err(|source| RegistryError::Close { name, source })
}

/// Lightweight summary of a loaded core for listings and logs.
#[derive(Debug, Clone, Serialize)]
pub struct CoreSummary {
    /// Core identity.
    pub id: CoreId,
    /// Current name.
    pub name: String,
    /// Whether the descriptor is transient.
    pub transient: bool,
    /// Data directory.
    pub data_dir: PathBuf,
    /// When the resource was opened.
    pub opened_at: DateTime<Utc>,
}

impl From<&CoreHandle> for CoreSummary {
    fn from(core: &CoreHandle) -> Self {
        Self {
            id: core.id(),
            name: core.name(),
            transient: core.descriptor.read().transient,
            data_dir: core.data_dir(),
            opened_at: core.opened_at(),
        }
    }
}
