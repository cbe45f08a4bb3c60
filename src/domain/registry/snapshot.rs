//! Point-in-time view of the registry for persistence.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CoreRegistry;
use crate::domain::{CoreDescriptor, CoreHandle};

/// One core as written to durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCore {
    /// Name the core was originally configured under. Equals the live name
    /// unless the core was renamed or swapped.
    pub orig_name: String,
    /// Whether a core instance was open when the snapshot was taken.
    pub loaded: bool,
    /// Live descriptor.
    pub descriptor: CoreDescriptor,
}

impl PersistedCore {
    /// Descriptor attributes plus the original name.
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = self.descriptor.attributes();
        attrs.insert("origName".to_string(), self.orig_name.clone());
        attrs
    }
}

/// Every core the registry knows, taken under one lock acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Cores in table order: permanent, transient, described, created.
    pub cores: Vec<PersistedCore>,
    /// Process-level attributes supplied by the caller.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// Finds a core by the name it was originally configured under.
    #[must_use]
    pub fn by_orig_name(&self, orig_name: &str) -> Option<&PersistedCore> {
        self.cores.iter().find(|c| c.orig_name == orig_name)
    }

    /// Live descriptors in snapshot order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<CoreDescriptor> {
        self.cores.iter().map(|c| c.descriptor.clone()).collect()
    }
}

impl CoreRegistry {
    /// Captures every known core with its original name.
    ///
    /// A dynamic descriptor is listed only when no core is loaded under its
    /// name, and a created core only when it is not yet in another table.
    #[must_use]
    pub fn snapshot(&self, attributes: BTreeMap<String, String>) -> RegistrySnapshot {
        let state = self.state.lock();
        let loaded = |name: &String, core: &Arc<CoreHandle>| PersistedCore {
            orig_name: state
                .orig_names
                .get(&core.id())
                .cloned()
                .unwrap_or_else(|| name.clone()),
            loaded: true,
            descriptor: core.descriptor(),
        };

        let mut cores: Vec<PersistedCore> = state
            .cores
            .iter()
            .map(|(name, core)| loaded(name, core))
            .collect();
        cores.extend(state.transient.iter().map(|(name, core)| loaded(name, core)));
        cores.extend(
            state
                .dynamic
                .iter()
                .filter(|(name, _)| {
                    !state.cores.contains_key(*name) && !state.transient.contains(name)
                })
                .map(|(name, desc)| PersistedCore {
                    orig_name: name.clone(),
                    loaded: false,
                    descriptor: desc.clone(),
                }),
        );
        cores.extend(
            state
                .created
                .iter()
                .filter(|(name, _)| {
                    !state.cores.contains_key(*name)
                        && !state.transient.contains(name)
                        && !state.dynamic.contains_key(*name)
                })
                .map(|(name, core)| loaded(name, core)),
        );

        RegistrySnapshot {
            cores,
            attributes,
            taken_at: Utc::now(),
        }
    }

    /// Descriptors of every permanent and transient core.
    #[must_use]
    pub fn loaded_descriptors(&self) -> Vec<CoreDescriptor> {
        let state = self.state.lock();
        state
            .cores
            .values()
            .chain(state.transient.iter().map(|(_, c)| c))
            .map(|core| core.descriptor())
            .collect()
    }
}
