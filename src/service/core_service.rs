//! Core service: orchestrates core lifecycles and emits events.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::close_worker::CloseWorker;
use crate::domain::{
    CoreDescriptor, CoreEvent, CoreHandle, CoreLoader, CoreRegistry, CoreState, DrainReport,
    EventBus, Lookup, NameLease, StateNotifier, close_off_thread,
};
use crate::error::{CoreError, RegistryError};
use crate::persistence::PersistenceBackend;

/// Orchestration layer for every core lifecycle operation.
///
/// Owns references to [`CoreRegistry`] for state, a [`CoreLoader`] for
/// opening cores and [`EventBus`] for event emission. Every mutation
/// follows the pattern: lease the name → open or close on the blocking
/// pool → update the registry → emit events → release.
#[derive(Debug)]
pub struct CoreService {
    registry: Arc<CoreRegistry>,
    loader: Arc<dyn CoreLoader>,
    event_bus: EventBus,
    persistence: PersistenceBackend,
    notifier: Option<Arc<dyn StateNotifier>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CoreService {
    /// Creates a new `CoreService` without a state notifier.
    #[must_use]
    pub fn new(
        registry: Arc<CoreRegistry>,
        loader: Arc<dyn CoreLoader>,
        event_bus: EventBus,
        persistence: PersistenceBackend,
    ) -> Self {
        Self {
            registry,
            loader,
            event_bus,
            persistence,
            notifier: None,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Sets the sink that [`CoreService::publish_cores_as_down`] reports to.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn StateNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Returns a reference to the inner [`EventBus`].
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Returns a reference to the inner [`CoreRegistry`].
    #[must_use]
    pub fn registry(&self) -> &Arc<CoreRegistry> {
        &self.registry
    }

    /// Starts `count` background close workers.
    pub fn spawn_close_workers(&self, count: usize) {
        let mut workers = self.workers.lock();
        let first = workers.len();
        for id in first..first + count {
            let worker = CloseWorker::new(id, Arc::clone(&self.registry));
            workers.push(tokio::spawn(worker.run()));
        }
        tracing::info!(workers = workers.len(), "close workers running");
    }

    /// Records a descriptor so the core can be loaded on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DataDirInUse`] if another core already uses
    /// the descriptor's data directory.
    pub fn register(&self, descriptor: CoreDescriptor) -> Result<(), RegistryError> {
        self.ensure_data_dir_free(&descriptor)?;
        tracing::debug!(core = %descriptor.name, transient = descriptor.transient, "registered core descriptor");
        self.registry.put_dynamic_descriptor(descriptor);
        Ok(())
    }

    /// Opens a new core and makes it resident, transient or permanent
    /// according to the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreExists`] if the name is loaded,
    /// [`RegistryError::DataDirInUse`] on a storage conflict,
    /// [`RegistryError::Open`] if the loader fails, or
    /// [`RegistryError::ShuttingDown`] during shutdown.
    pub async fn create(&self, descriptor: CoreDescriptor) -> Result<Arc<CoreHandle>, RegistryError> {
        let _lease = self.registry.lease(&descriptor.name).await?;
        if self.registry.is_loaded(&descriptor.name) {
            return Err(RegistryError::CoreExists(descriptor.name));
        }
        self.ensure_data_dir_free(&descriptor)?;
        self.load(descriptor).await
    }

    /// Resolves a loaded core, loading a registered descriptor on first
    /// use. A transient hit counts as an access.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreNotFound`] if nothing is registered
    /// under `name`, [`RegistryError::Open`] if a lazy load fails, or
    /// [`RegistryError::ShuttingDown`] during shutdown.
    pub async fn get_core(&self, name: &str) -> Result<Arc<CoreHandle>, RegistryError> {
        match self.registry.lookup(name) {
            Lookup::Loaded(core) => return Ok(core),
            Lookup::Unknown => return Err(RegistryError::CoreNotFound(name.to_string())),
            Lookup::Registered => {}
        }

        let lease = self.registry.lease(name).await?;
        if let Some(core) = lease.core() {
            return Ok(Arc::clone(core));
        }
        // Someone may have unloaded the core while we waited.
        let descriptor = self
            .registry
            .unloaded_descriptor(name)
            .ok_or_else(|| RegistryError::CoreNotFound(name.to_string()))?;
        self.load(descriptor).await
    }

    /// Removes `name` everywhere and closes its core if one was loaded.
    ///
    /// A failed close is logged; the core is gone from the registry either
    /// way.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreNotFound`] if nothing is registered
    /// under `name`, or [`RegistryError::ShuttingDown`] during shutdown.
    pub async fn unload(&self, name: &str) -> Result<(), RegistryError> {
        let _lease = self.registry.lease(name).await?;
        let removed = self
            .registry
            .remove(name, true)
            .ok_or_else(|| RegistryError::CoreNotFound(name.to_string()))?;
        if let Some(core) = removed.into_core() {
            self.close_and_report(core).await;
        }

        let _ = self.event_bus.publish(CoreEvent::CoreUnloaded {
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(core = name, "core unloaded");
        Ok(())
    }

    /// Replaces the core under `name` with a freshly opened instance of its
    /// current descriptor and closes the old one.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreNotFound`] if `name` is not loaded,
    /// [`RegistryError::Open`] if the new instance fails to open (the old
    /// one stays in service), or [`RegistryError::ShuttingDown`].
    pub async fn reload(&self, name: &str) -> Result<Arc<CoreHandle>, RegistryError> {
        let lease = self.registry.lease(name).await?;
        let old = lease
            .core()
            .cloned()
            .ok_or_else(|| RegistryError::CoreNotFound(name.to_string()))?;

        let fresh = self.open(old.descriptor()).await?;
        let replaced = match self.registry.replace(name, Arc::clone(&fresh)) {
            Ok(replaced) => replaced,
            Err(err) => {
                self.close_and_report(fresh).await;
                return Err(err);
            }
        };
        self.close_and_report(replaced).await;

        let _ = self.event_bus.publish(CoreEvent::CoreReloaded {
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(core = name, "core reloaded");
        Ok(fresh)
    }

    /// Renames a loaded core.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreNotFound`] if `from` is not loaded,
    /// [`RegistryError::CoreExists`] if `to` is taken, or
    /// [`RegistryError::ShuttingDown`].
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), RegistryError> {
        let _leases = self.lease_pair(from, to).await?;
        self.registry.rename(from, to)?;

        let _ = self.event_bus.publish(CoreEvent::CoreRenamed {
            from: from.to_string(),
            to: to.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(from, to, "core renamed");
        Ok(())
    }

    /// Exchanges the names of two permanent cores.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CoreNotFound`] if either name is not a
    /// permanent core, or [`RegistryError::ShuttingDown`].
    pub async fn swap(&self, first: &str, second: &str) -> Result<(), RegistryError> {
        let _leases = self.lease_pair(first, second).await?;
        self.registry.swap(first, second)?;

        let _ = self.event_bus.publish(CoreEvent::CoresSwapped {
            first: first.to_string(),
            second: second.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(first, second, "cores swapped");
        Ok(())
    }

    /// Writes a snapshot of the registry through the persistence backend.
    /// Does nothing when persistence is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] if the backend fails.
    pub async fn persist(&self, attributes: BTreeMap<String, String>) -> Result<(), RegistryError> {
        if !self.persistence.is_enabled() {
            return Ok(());
        }
        let snapshot = self.registry.snapshot(attributes);
        self.persistence.persist(&snapshot).await?;
        tracing::info!(cores = snapshot.cores.len(), "registry persisted");
        Ok(())
    }

    /// Reports every loaded core as down to the state notifier. Failures
    /// are logged per core.
    pub fn publish_cores_as_down(&self) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        for descriptor in self.registry.loaded_descriptors() {
            if let Err(err) = notifier.publish(&descriptor, CoreState::Down) {
                tracing::error!(core = %descriptor.name, error = %err, "failed to publish core as down");
            }
        }
    }

    /// Shuts the registry down: refuses new work, reports cores as down,
    /// persists, closes every core and waits for the close workers.
    pub async fn shutdown(&self) -> DrainReport {
        if !self.registry.begin_shutdown() {
            tracing::warn!("shutdown requested twice");
        }
        self.publish_cores_as_down();
        if let Err(err) = self.persist(BTreeMap::new()).await {
            tracing::error!(error = %err, "failed to persist registry during shutdown");
        }

        let report = self.registry.drain_all().await;

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "close worker ended abnormally");
            }
        }
        tracing::info!(
            closed = report.closed,
            failed = report.failed,
            "core service stopped"
        );
        report
    }

    /// Registers every descriptor and creates the permanent ones flagged
    /// for startup. Returns how many cores were opened; failures are
    /// logged and skipped.
    pub async fn load_on_startup(&self, descriptors: Vec<CoreDescriptor>) -> usize {
        let mut eager = Vec::new();
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            let wanted = descriptor.load_on_startup && !descriptor.transient;
            match self.register(descriptor.clone()) {
                Ok(()) if wanted => eager.push(descriptor),
                Ok(()) => {}
                Err(err) => {
                    tracing::error!(core = %name, error = %err, "failed to register core");
                }
            }
        }

        let mut opened = 0;
        for descriptor in eager {
            let name = descriptor.name.clone();
            match self.create(descriptor).await {
                Ok(_) => opened += 1,
                Err(err) => tracing::error!(core = %name, error = %err, "failed to load core on startup"),
            }
        }
        tracing::info!(opened, "startup cores loaded");
        opened
    }

    fn ensure_data_dir_free(&self, descriptor: &CoreDescriptor) -> Result<(), RegistryError> {
        let path = descriptor.data_dir();
        match self.registry.check_unique_data_dir(&path) {
            Some(owner) if owner != descriptor.name => {
                Err(RegistryError::DataDirInUse { path, owner })
            }
            _ => Ok(()),
        }
    }

    /// Opens `descriptor` and makes it resident. The caller holds the
    /// name's lease.
    async fn load(&self, descriptor: CoreDescriptor) -> Result<Arc<CoreHandle>, RegistryError> {
        let name = descriptor.name.clone();
        let transient = descriptor.transient;
        let core = self.open(descriptor.clone()).await?;
        if transient && self.registry.dynamic_descriptor(&name).is_none() {
            self.registry.put_dynamic_descriptor(descriptor);
        }
        if let Err(err) = self.registry.add_created(Arc::clone(&core)) {
            self.close_and_report(core).await;
            return Err(err);
        }
        match self.registry.promote_created(&name, transient) {
            Ok(Some(displaced)) => {
                tracing::warn!(core = %name, "load displaced a core that bypassed the guard");
                self.close_and_report(displaced).await;
            }
            Ok(None) => {}
            Err(err) => {
                if let Some(created) = self.registry.take_created(&name) {
                    self.close_and_report(created).await;
                }
                return Err(err);
            }
        }
        if self.registry.orig_name(&core).is_none() {
            self.registry.put_orig_name(&core, &name);
        }

        let _ = self.event_bus.publish(CoreEvent::CoreLoaded {
            name: name.clone(),
            transient,
            timestamp: Utc::now(),
        });
        tracing::info!(core = %name, transient, "core loaded");
        Ok(core)
    }

    /// Runs the loader on the blocking pool.
    async fn open(&self, descriptor: CoreDescriptor) -> Result<Arc<CoreHandle>, RegistryError> {
        let name = descriptor.name.clone();
        let loader = Arc::clone(&self.loader);
        let opened = tokio::task::spawn_blocking(move || -> Result<Arc<CoreHandle>, CoreError> {
            let resource = loader.open(&descriptor)?;
            Ok(Arc::new(CoreHandle::new(descriptor, resource)))
        })
        .await
        .map_err(|e| CoreError::Other(format!("open task failed: {e}")))
        .and_then(|res| res);

        opened.map_err(|source| {
            tracing::error!(core = %name, error = %source, "failed to open core");
            RegistryError::Open { name, source }
        })
    }

    /// Closes `core` off-thread, logging a failure, and publishes the
    /// outcome.
    async fn close_and_report(&self, core: Arc<CoreHandle>) {
        let name = core.name();
        let clean = match close_off_thread(core).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(core = %name, error = %err, "failed to close core");
                false
            }
        };
        let _ = self.event_bus.publish(CoreEvent::CoreClosed {
            name,
            clean,
            timestamp: Utc::now(),
        });
    }

    /// Leases two names in sorted order so concurrent pair operations
    /// cannot deadlock.
    async fn lease_pair(&self, a: &str, b: &str) -> Result<Vec<NameLease<'_>>, RegistryError> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let mut leases = vec![self.registry.lease(first).await?];
        if second != first {
            leases.push(self.registry.lease(second).await?);
        }
        Ok(leases)
    }
}
