//! Synchronized registry of every core the process knows about.
//!
//! [`CoreRegistry`] owns four collections, the set of names with an
//! operation in flight, and the eviction backlog, all behind one
//! [`parking_lot::Mutex`]:
//!
//! ```text
//!   cores      name -> core         permanently resident
//!   transient  name -> core (LRU)   loaded, evictable
//!   created    name -> core         opened, not yet classified
//!   dynamic    name -> descriptor   known, maybe not loaded
//!   pending    {name}               lifecycle operation in flight
//!   backlog    [core]               evicted, waiting for a close worker
//! ```
//!
//! One lock is used so that cross-collection invariants hold atomically:
//! a core lives in at most one of `cores`, `transient` and `backlog`, and
//! at most one operation runs per name. The lock is never held across an
//! `.await` or while a core is opened or closed. Waiters sleep on a single
//! [`Notify`] that is always fired with `notify_waiters`, and re-check
//! their condition after every wake.

mod drain;
mod guard;
mod snapshot;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

pub use drain::DrainReport;
pub use guard::NameLease;
pub use snapshot::{PersistedCore, RegistrySnapshot};

use super::transient_cache::TransientCache;
use super::{CoreDescriptor, CoreEvent, CoreHandle, CoreId, EventBus};
use crate::error::RegistryError;

/// What [`CoreRegistry::remove`] found first under a name.
#[derive(Debug)]
pub enum RemovedEntry {
    /// A permanent core.
    Loaded(Arc<CoreHandle>),
    /// A transient core.
    Transient(Arc<CoreHandle>),
    /// A created but not yet classified core.
    Created(Arc<CoreHandle>),
    /// Only a descriptor; nothing was loaded.
    Descriptor(CoreDescriptor),
}

impl RemovedEntry {
    /// The removed core, if one was loaded.
    #[must_use]
    pub fn core(&self) -> Option<&Arc<CoreHandle>> {
        match self {
            Self::Loaded(core) | Self::Transient(core) | Self::Created(core) => Some(core),
            Self::Descriptor(_) => None,
        }
    }

    /// Consumes the entry, returning the removed core if one was loaded.
    #[must_use]
    pub fn into_core(self) -> Option<Arc<CoreHandle>> {
        match self {
            Self::Loaded(core) | Self::Transient(core) | Self::Created(core) => Some(core),
            Self::Descriptor(_) => None,
        }
    }
}

/// How [`CoreRegistry::lookup`] resolved a name.
#[derive(Debug)]
pub enum Lookup {
    /// A permanent or transient core is loaded under the name.
    Loaded(Arc<CoreHandle>),
    /// Nothing is loaded, but a descriptor or a core being created exists.
    Registered,
    /// The registry does not know the name.
    Unknown,
}

#[derive(Debug)]
struct RegistryState {
    cores: IndexMap<String, Arc<CoreHandle>>,
    transient: TransientCache,
    dynamic: IndexMap<String, CoreDescriptor>,
    created: IndexMap<String, Arc<CoreHandle>>,
    orig_names: HashMap<CoreId, String>,
    pending: HashSet<String>,
    backlog: VecDeque<Arc<CoreHandle>>,
    // Only dynamically declared cores can be transient.
    dynamic_seen: bool,
    shutting_down: bool,
}

impl RegistryState {
    fn new(transient_capacity: Option<NonZeroUsize>) -> Self {
        Self {
            cores: IndexMap::new(),
            transient: TransientCache::new(transient_capacity),
            dynamic: IndexMap::new(),
            created: IndexMap::new(),
            orig_names: HashMap::new(),
            pending: HashSet::new(),
            backlog: VecDeque::new(),
            dynamic_seen: false,
            shutting_down: false,
        }
    }

    fn ensure_running(&self) -> Result<(), RegistryError> {
        if self.shutting_down {
            return Err(RegistryError::ShuttingDown);
        }
        Ok(())
    }

    fn get_from_any_list(&mut self, name: &str) -> Option<Arc<CoreHandle>> {
        if let Some(core) = self.cores.get(name) {
            return Some(Arc::clone(core));
        }
        if !self.dynamic_seen {
            return None;
        }
        self.transient.get(name)
    }

    /// A name is busy while an operation holds it or while a core with that
    /// name waits in the backlog.
    fn is_busy(&self, name: &str) -> bool {
        self.pending.contains(name) || self.in_backlog(name)
    }

    fn in_backlog(&self, name: &str) -> bool {
        self.backlog.iter().any(|core| core.is_named(name))
    }

    fn knows(&self, name: &str) -> bool {
        self.cores.contains_key(name)
            || self.transient.contains(name)
            || self.created.contains_key(name)
            || self.dynamic.contains_key(name)
    }

    fn insert_transient(
        &mut self,
        name: &str,
        core: Arc<CoreHandle>,
    ) -> (Option<Arc<CoreHandle>>, Option<String>) {
        let outcome = self.transient.insert(name.to_string(), core);
        let evicted = outcome.evicted.map(|(evicted_name, evicted_core)| {
            self.backlog.push_back(evicted_core);
            evicted_name
        });
        (outcome.displaced, evicted)
    }
}

/// Lifecycle registry for named cores.
///
/// Thread-safe; share it as `Arc<CoreRegistry>`.
#[derive(Debug)]
pub struct CoreRegistry {
    state: Mutex<RegistryState>,
    wakeup: Notify,
    event_bus: EventBus,
}

impl CoreRegistry {
    /// Creates an empty registry. `transient_capacity` bounds the transient
    /// cache; `None` leaves it unbounded.
    #[must_use]
    pub fn new(transient_capacity: Option<NonZeroUsize>, event_bus: EventBus) -> Self {
        if let Some(cap) = transient_capacity {
            tracing::info!(capacity = cap.get(), "allocating transient cache");
        }
        Self {
            state: Mutex::new(RegistryState::new(transient_capacity)),
            wakeup: Notify::new(),
            event_bus,
        }
    }

    /// Event bus evictions are published on.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Whether the transient cache has a capacity limit.
    #[must_use]
    pub fn has_bounded_transient_cache(&self) -> bool {
        self.state.lock().transient.is_bounded()
    }

    /// Inserts a permanent core, returning whatever was mapped under `name`.
    /// The caller owns, and must close, a displaced core.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ShuttingDown`] once shutdown has begun.
    pub fn put(
        &self,
        name: &str,
        core: Arc<CoreHandle>,
    ) -> Result<Option<Arc<CoreHandle>>, RegistryError> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        Ok(state.cores.insert(name.to_string(), core))
    }

    /// Inserts a transient core, returning the core previously cached under
    /// `name`.
    ///
    /// If the cache overflows, its least recently used core moves to the
    /// eviction backlog for a close worker to pick up.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ShuttingDown`] once shutdown has begun.
    pub fn put_transient(
        &self,
        name: &str,
        core: Arc<CoreHandle>,
    ) -> Result<Option<Arc<CoreHandle>>, RegistryError> {
        let (displaced, evicted) = {
            let mut state = self.state.lock();
            state.ensure_running()?;
            state.insert_transient(name, core)
        };
        tracing::debug!(core = name, "registered transient core");
        self.after_eviction(evicted);
        Ok(displaced)
    }

    /// Publishes and wakes waiters for a core that just entered the backlog.
    /// Called with the lock released.
    fn after_eviction(&self, evicted: Option<String>) {
        let Some(name) = evicted else {
            return;
        };
        tracing::debug!(core = %name, "evicted transient core, queued for close");
        let _ = self.event_bus.publish(CoreEvent::CoreEvicted {
            name,
            timestamp: Utc::now(),
        });
        self.wakeup.notify_waiters();
    }

    /// Looks up a permanent core. Transient cores are not returned.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CoreHandle>> {
        self.state.lock().cores.get(name).cloned()
    }

    /// Looks up a permanent core, then a transient one. A transient hit
    /// counts as an access for eviction purposes.
    #[must_use]
    pub fn get_from_any_list(&self, name: &str) -> Option<Arc<CoreHandle>> {
        self.state.lock().get_from_any_list(name)
    }

    /// Resolves `name` in one critical section: a loaded core (counting as
    /// a transient access), a registered but unloaded name, or nothing.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Lookup {
        let mut state = self.state.lock();
        if let Some(core) = state.get_from_any_list(name) {
            return Lookup::Loaded(core);
        }
        if state.knows(name) {
            Lookup::Registered
        } else {
            Lookup::Unknown
        }
    }

    /// Removes `name` from every table and reports what was found first, in
    /// the order permanent, transient, created, descriptor.
    ///
    /// With `remove_orig`, the removed core's original-name entry is dropped.
    /// Any further core found under the same name violates the single
    /// location invariant; it is logged and queued for close.
    pub fn remove(&self, name: &str, remove_orig: bool) -> Option<RemovedEntry> {
        let (found, strays) = {
            let mut state = self.state.lock();
            let loaded = state.cores.shift_remove(name).map(RemovedEntry::Loaded);
            let transient = state.transient.remove(name).map(RemovedEntry::Transient);
            let created = state.created.shift_remove(name).map(RemovedEntry::Created);
            let descriptor = state.dynamic.shift_remove(name).map(RemovedEntry::Descriptor);

            let mut found = None;
            let mut strays = Vec::new();
            for entry in [loaded, transient, created, descriptor].into_iter().flatten() {
                if let Some(core) = entry.core()
                    && remove_orig
                {
                    state.orig_names.remove(&core.id());
                }
                if found.is_none() {
                    found = Some(entry);
                } else if let Some(core) = entry.into_core() {
                    state.backlog.push_back(Arc::clone(&core));
                    strays.push(core);
                }
            }
            (found, strays)
        };
        if !strays.is_empty() {
            tracing::warn!(
                core = name,
                strays = strays.len(),
                "name was mapped in more than one table; queued extra cores for close"
            );
            self.wakeup.notify_waiters();
        }
        found
    }

    /// Exchanges two permanent cores, renaming each core and its descriptor
    /// to its new key in the same critical section.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreNotFound`] if either name is not a
    /// permanent core, or [`RegistryError::ShuttingDown`] during shutdown.
    pub fn swap(&self, n0: &str, n1: &str) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        let c0 = state
            .cores
            .get(n0)
            .cloned()
            .ok_or_else(|| RegistryError::CoreNotFound(n0.to_string()))?;
        let c1 = state
            .cores
            .get(n1)
            .cloned()
            .ok_or_else(|| RegistryError::CoreNotFound(n1.to_string()))?;

        state.cores.insert(n0.to_string(), Arc::clone(&c1));
        state.cores.insert(n1.to_string(), Arc::clone(&c0));
        c0.set_name(n1);
        c1.set_name(n0);
        Ok(())
    }

    /// Moves a loaded core from `from` to `to`, renaming the core and its
    /// descriptor. A dynamic descriptor registered under `from` follows.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreNotFound`] if `from` is not loaded,
    /// [`RegistryError::CoreExists`] if `to` is already known or an evicted
    /// core with that name still waits to be closed, or
    /// [`RegistryError::ShuttingDown`] during shutdown.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), RegistryError> {
        let evicted = {
            let mut state = self.state.lock();
            state.ensure_running()?;
            if !state.cores.contains_key(from) && !state.transient.contains(from) {
                return Err(RegistryError::CoreNotFound(from.to_string()));
            }
            if from == to {
                return Ok(());
            }
            if state.knows(to) || state.in_backlog(to) {
                return Err(RegistryError::CoreExists(to.to_string()));
            }

            let mut evicted = None;
            if let Some(core) = state.cores.shift_remove(from) {
                core.set_name(to);
                state.cores.insert(to.to_string(), core);
            } else if let Some(core) = state.transient.remove(from) {
                core.set_name(to);
                (_, evicted) = state.insert_transient(to, core);
            }
            if let Some(desc) = state.dynamic.shift_remove(from) {
                state.dynamic.insert(to.to_string(), desc.renamed(to));
            }
            evicted
        };
        self.after_eviction(evicted);
        Ok(())
    }

    /// Puts `core` where the core currently named `name` lives (transient
    /// stays transient) and hands the original-name entry over to it.
    /// Returns the replaced core, which the caller must close.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreNotFound`] if `name` is not loaded, or
    /// [`RegistryError::ShuttingDown`] during shutdown.
    pub fn replace(
        &self,
        name: &str,
        core: Arc<CoreHandle>,
    ) -> Result<Arc<CoreHandle>, RegistryError> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        let new_id = core.id();
        let old = if state.cores.contains_key(name) {
            state.cores.insert(name.to_string(), core)
        } else if state.transient.contains(name) {
            state.insert_transient(name, core).0
        } else {
            None
        };
        let old = old.ok_or_else(|| RegistryError::CoreNotFound(name.to_string()))?;
        if let Some(orig) = state.orig_names.remove(&old.id()) {
            state.orig_names.insert(new_id, orig);
        }
        Ok(old)
    }

    /// Registers a descriptor for a core that may be loaded later.
    pub fn put_dynamic_descriptor(&self, descriptor: CoreDescriptor) {
        let mut state = self.state.lock();
        state.dynamic_seen = true;
        state.dynamic.insert(descriptor.name.clone(), descriptor);
    }

    /// Descriptor registered under `name`, whether loaded or not.
    #[must_use]
    pub fn dynamic_descriptor(&self, name: &str) -> Option<CoreDescriptor> {
        self.state.lock().dynamic.get(name).cloned()
    }

    /// Descriptor registered under `name`, only if no core is loaded there.
    #[must_use]
    pub fn unloaded_descriptor(&self, name: &str) -> Option<CoreDescriptor> {
        let state = self.state.lock();
        if state.cores.contains_key(name) || state.transient.contains(name) {
            return None;
        }
        state.dynamic.get(name).cloned()
    }

    /// Parks a freshly opened core until it is classified with
    /// [`CoreRegistry::promote_created`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ShuttingDown`] once shutdown has begun.
    pub fn add_created(&self, core: Arc<CoreHandle>) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        state.ensure_running()?;
        state.created.insert(core.name(), core);
        Ok(())
    }

    /// Atomically moves a created core into the transient cache or the
    /// permanent table. Returns any core displaced at that name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreNotFound`] if nothing was created under
    /// `name`, or [`RegistryError::ShuttingDown`] during shutdown. A core
    /// that cannot be promoted stays in the created table.
    pub fn promote_created(
        &self,
        name: &str,
        transient: bool,
    ) -> Result<Option<Arc<CoreHandle>>, RegistryError> {
        let (displaced, evicted) = {
            let mut state = self.state.lock();
            state.ensure_running()?;
            let core = state
                .created
                .shift_remove(name)
                .ok_or_else(|| RegistryError::CoreNotFound(name.to_string()))?;
            if transient {
                state.insert_transient(name, core)
            } else {
                (state.cores.insert(name.to_string(), core), None)
            }
        };
        self.after_eviction(evicted);
        Ok(displaced)
    }

    /// Takes back a created core that could not be promoted. Allowed during
    /// shutdown so the caller can close it.
    pub fn take_created(&self, name: &str) -> Option<Arc<CoreHandle>> {
        self.state.lock().created.shift_remove(name)
    }

    /// Records the name `core` was originally configured under.
    pub fn put_orig_name(&self, core: &CoreHandle, name: &str) {
        self.state.lock().orig_names.insert(core.id(), name.to_string());
    }

    /// Name `core` was originally configured under.
    #[must_use]
    pub fn orig_name(&self, core: &CoreHandle) -> Option<String> {
        self.state.lock().orig_names.get(&core.id()).cloned()
    }

    /// Moves the original-name entry of `old` over to `new`.
    pub fn transfer_orig_name(&self, new: &CoreHandle, old: &CoreHandle) {
        let mut state = self.state.lock();
        if let Some(orig) = state.orig_names.remove(&old.id()) {
            state.orig_names.insert(new.id(), orig);
        }
    }

    /// Returns `true` if `name` is a permanent or transient core.
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        let state = self.state.lock();
        state.cores.contains_key(name) || state.transient.contains(name)
    }

    /// Snapshot of the permanent cores.
    #[must_use]
    pub fn cores(&self) -> Vec<Arc<CoreHandle>> {
        self.state.lock().cores.values().cloned().collect()
    }

    /// Sorted names of permanent and transient cores.
    #[must_use]
    pub fn core_names(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: BTreeSet<String> = state.cores.keys().cloned().collect();
        names.extend(state.transient.names());
        names.into_iter().collect()
    }

    /// Sorted names of every core the registry knows, loaded or not.
    #[must_use]
    pub fn all_names(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: BTreeSet<String> = state.cores.keys().cloned().collect();
        names.extend(state.transient.names());
        names.extend(state.dynamic.keys().cloned());
        names.extend(state.created.keys().cloned());
        names.into_iter().collect()
    }

    /// Every name under which this core instance is mapped.
    #[must_use]
    pub fn core_names_for(&self, core: &CoreHandle) -> Vec<String> {
        let id = core.id();
        let state = self.state.lock();
        state
            .cores
            .iter()
            .chain(state.transient.iter())
            .filter(|(_, c)| c.id() == id)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns the name of a loaded, transient or described core whose data
    /// directory is `path`.
    #[must_use]
    pub fn check_unique_data_dir(&self, path: &Path) -> Option<String> {
        let state = self.state.lock();
        state
            .cores
            .values()
            .chain(state.transient.iter().map(|(_, c)| c))
            .find(|core| core.data_dir() == path)
            .map(|core| core.name())
            .or_else(|| {
                state
                    .dynamic
                    .values()
                    .find(|desc| desc.data_dir() == path)
                    .map(|desc| desc.name.clone())
            })
    }

    /// Number of permanent cores.
    #[must_use]
    pub fn loaded_len(&self) -> usize {
        self.state.lock().cores.len()
    }

    /// Number of cached transient cores.
    #[must_use]
    pub fn transient_len(&self) -> usize {
        self.state.lock().transient.len()
    }

    /// Transient names from most to least recently used.
    #[must_use]
    pub fn transient_names(&self) -> Vec<String> {
        self.state.lock().transient.names()
    }

    /// Number of cores waiting to be closed.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// Names of cores waiting to be closed, oldest first.
    #[must_use]
    pub fn backlog_names(&self) -> Vec<String> {
        self.state.lock().backlog.iter().map(|c| c.name()).collect()
    }

    /// Returns `true` while a lifecycle operation holds `name`.
    #[must_use]
    pub fn is_pending(&self, name: &str) -> bool {
        self.state.lock().pending.contains(name)
    }

    /// Returns `true` once shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}
