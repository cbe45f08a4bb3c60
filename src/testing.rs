//! In-memory collaborators for unit tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::domain::{CoreDescriptor, CoreHandle, CoreLoader, IndexCore};
use crate::error::CoreError;

/// Counts closes of one [`TestCore`].
#[derive(Debug, Clone, Default)]
pub(crate) struct CloseProbe(Arc<AtomicUsize>);

impl CloseProbe {
    pub(crate) fn closes(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub(crate) struct TestCore {
    data_dir: PathBuf,
    probe: CloseProbe,
    fail_close: bool,
}

impl TestCore {
    fn boxed(descriptor: &CoreDescriptor, fail_close: bool) -> (Box<dyn IndexCore>, CloseProbe) {
        let probe = CloseProbe::default();
        let core = Self {
            data_dir: descriptor.data_dir(),
            probe: probe.clone(),
            fail_close,
        };
        (Box::new(core), probe)
    }

    pub(crate) fn handle(name: &str) -> (Arc<CoreHandle>, CloseProbe) {
        Self::from_descriptor(CoreDescriptor::new(name, format!("/cores/{name}")), false)
    }

    pub(crate) fn failing_handle(name: &str) -> (Arc<CoreHandle>, CloseProbe) {
        Self::from_descriptor(CoreDescriptor::new(name, format!("/cores/{name}")), true)
    }

    pub(crate) fn from_descriptor(
        descriptor: CoreDescriptor,
        fail_close: bool,
    ) -> (Arc<CoreHandle>, CloseProbe) {
        let (resource, probe) = Self::boxed(&descriptor, fail_close);
        (Arc::new(CoreHandle::new(descriptor, resource)), probe)
    }
}

impl IndexCore for TestCore {
    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn close(&self) -> Result<(), CoreError> {
        self.probe.0.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(CoreError::Other("injected close failure".to_string()));
        }
        Ok(())
    }
}

/// Loader that records every open and close.
#[derive(Debug, Default)]
pub(crate) struct TestLoader {
    opens: AtomicUsize,
    probes: Mutex<Vec<(String, CloseProbe)>>,
    fail_open: Mutex<HashSet<String>>,
    fail_close: Mutex<HashSet<String>>,
}

impl TestLoader {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_open_for(&self, name: &str) {
        self.fail_open.lock().insert(name.to_string());
    }

    pub(crate) fn fail_close_for(&self, name: &str) {
        self.fail_close.lock().insert(name.to_string());
    }

    /// Close count summed over every core opened under `name`.
    pub(crate) fn closes_of(&self, name: &str) -> usize {
        self.probes
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, p)| p.closes())
            .sum()
    }

    /// Close counts of every opened core, in open order.
    pub(crate) fn all_closes(&self) -> Vec<usize> {
        self.probes.lock().iter().map(|(_, p)| p.closes()).collect()
    }
}

impl CoreLoader for TestLoader {
    fn open(&self, descriptor: &CoreDescriptor) -> Result<Box<dyn IndexCore>, CoreError> {
        if self.fail_open.lock().contains(&descriptor.name) {
            return Err(CoreError::Config(format!("cannot open {}", descriptor.name)));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let fail_close = self.fail_close.lock().contains(&descriptor.name);
        let (core, probe) = TestCore::boxed(descriptor, fail_close);
        self.probes.lock().push((descriptor.name.clone(), probe));
        Ok(core)
    }
}
