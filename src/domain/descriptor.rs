//! Static description of a core, independent of whether it is loaded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Attribute keys written by [`CoreDescriptor::attributes`].
pub mod keys {
    /// Live core name.
    pub const NAME: &str = "name";
    /// Instance directory.
    pub const INSTANCE_DIR: &str = "instanceDir";
    /// Data directory.
    pub const DATA_DIR: &str = "dataDir";
    /// Update log directory.
    pub const ULOG_DIR: &str = "ulogDir";
    /// Transient flag.
    pub const TRANSIENT: &str = "transient";
    /// Load-on-startup flag.
    pub const LOAD_ON_STARTUP: &str = "loadOnStartup";
    /// Cluster collection name.
    pub const COLLECTION: &str = "collection";
    /// Cluster shard id.
    pub const SHARD: &str = "shard";
    /// Cluster roles.
    pub const ROLES: &str = "roles";
}

/// Cluster placement of a core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudDescriptor {
    /// Collection the core belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Shard the core serves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<String>,
    /// Comma separated node roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<String>,
}

/// Configuration of one core.
///
/// Cheap to clone. Registry code never mutates a descriptor that is
/// visible to other callers; it stores a fresh copy instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreDescriptor {
    /// Core name.
    pub name: String,
    /// Directory holding the core's configuration.
    pub instance_dir: PathBuf,
    /// Index data directory. Defaults to `<instance_dir>/data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Update log directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ulog_dir: Option<PathBuf>,
    /// Whether the core may be evicted under capacity pressure.
    #[serde(default)]
    pub transient: bool,
    /// Whether the core is opened when the process starts.
    #[serde(default = "default_load_on_startup")]
    pub load_on_startup: bool,
    /// Cluster placement, if the process runs in cluster mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudDescriptor>,
    /// Free-form core properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

fn default_load_on_startup() -> bool {
    true
}

impl CoreDescriptor {
    /// Creates a descriptor for a permanent, load-on-startup core.
    #[must_use]
    pub fn new(name: impl Into<String>, instance_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            instance_dir: instance_dir.into(),
            data_dir: None,
            ulog_dir: None,
            transient: false,
            load_on_startup: true,
            cloud: None,
            properties: BTreeMap::new(),
        }
    }

    /// Marks the descriptor transient (evictable) and lazily loaded.
    #[must_use]
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self.load_on_startup = false;
        self
    }

    /// Overrides the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Returns a copy carrying a different name.
    #[must_use]
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Resolves relative instance and data directories against `root`.
    #[must_use]
    pub fn resolved_against(mut self, root: &Path) -> Self {
        if self.instance_dir.is_relative() {
            self.instance_dir = root.join(&self.instance_dir);
        }
        if let Some(dir) = self.data_dir.take() {
            self.data_dir = Some(if dir.is_relative() {
                self.instance_dir.join(dir)
            } else {
                dir
            });
        }
        self
    }

    /// Effective data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.instance_dir.join("data"))
    }

    /// Collection name, falling back to the core name.
    #[must_use]
    pub fn collection(&self) -> &str {
        self.cloud
            .as_ref()
            .and_then(|c| c.collection.as_deref())
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.name)
    }

    /// Flattens the descriptor into the attribute map written by
    /// persistence backends.
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert(keys::NAME.to_string(), self.name.clone());
        attrs.insert(
            keys::INSTANCE_DIR.to_string(),
            self.instance_dir.display().to_string(),
        );
        attrs.insert(
            keys::DATA_DIR.to_string(),
            self.data_dir().display().to_string(),
        );
        if let Some(ulog) = &self.ulog_dir {
            attrs.insert(keys::ULOG_DIR.to_string(), ulog.display().to_string());
        }
        attrs.insert(keys::TRANSIENT.to_string(), self.transient.to_string());
        attrs.insert(
            keys::LOAD_ON_STARTUP.to_string(),
            self.load_on_startup.to_string(),
        );
        attrs.insert(keys::COLLECTION.to_string(), self.collection().to_string());
        if let Some(cloud) = &self.cloud {
            if let Some(shard) = &cloud.shard_id {
                attrs.insert(keys::SHARD.to_string(), shard.clone());
            }
            if let Some(roles) = &cloud.roles {
                attrs.insert(keys::ROLES.to_string(), roles.clone());
            }
        }
        attrs
    }
}
