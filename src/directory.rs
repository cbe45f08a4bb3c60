//! Directory-backed reference loader.
//!
//! A [`DirectoryCore`] owns `<data_dir>/core.lock` while it is open, so two
//! processes (or two loaders) can never serve the same index data. Instances
//! opened through one [`DirectoryLoader`] share the lock, which lets a reload
//! open the fresh instance before the old one closes.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::{CoreDescriptor, CoreLoader, IndexCore};
use crate::error::CoreError;

/// Lock file name inside a data directory.
pub const LOCK_FILE: &str = "core.lock";

/// Open instances per locked data directory.
type LockTable = Arc<Mutex<HashMap<PathBuf, usize>>>;

/// Opens cores as plain directories under a root.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
    locks: LockTable,
}

impl DirectoryLoader {
    /// Creates a loader resolving relative instance directories against
    /// `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: LockTable::default(),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of open instances holding the lock of `data_dir`.
    #[must_use]
    pub fn holders(&self, data_dir: &Path) -> usize {
        self.locks.lock().get(data_dir).copied().unwrap_or(0)
    }
}

impl CoreLoader for DirectoryLoader {
    fn open(&self, descriptor: &CoreDescriptor) -> Result<Box<dyn IndexCore>, CoreError> {
        let descriptor = descriptor.clone().resolved_against(&self.root);
        Ok(Box::new(DirectoryCore::acquire(
            &descriptor,
            Arc::clone(&self.locks),
        )?))
    }
}

/// An open core directory holding its lock file.
#[derive(Debug)]
pub struct DirectoryCore {
    data_dir: PathBuf,
    lock_path: PathBuf,
    locks: LockTable,
}

impl DirectoryCore {
    /// Creates the data directory if needed and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Locked`] if the lock file already exists, or
    /// [`CoreError::Io`] if the directory or lock cannot be created.
    pub fn open(descriptor: &CoreDescriptor) -> Result<Self, CoreError> {
        Self::acquire(descriptor, LockTable::default())
    }

    fn acquire(descriptor: &CoreDescriptor, locks: LockTable) -> Result<Self, CoreError> {
        let data_dir = descriptor.data_dir();
        let lock_path = data_dir.join(LOCK_FILE);

        {
            let mut held = locks.lock();
            if let Some(instances) = held.get_mut(&data_dir) {
                *instances += 1;
                tracing::debug!(core = %descriptor.name, instances = *instances, "sharing core lock with a new instance");
            } else {
                Self::create_lock(descriptor, &data_dir, &lock_path)?;
                held.insert(data_dir.clone(), 1);
            }
        }

        tracing::debug!(core = %descriptor.name, data_dir = %data_dir.display(), "opened core directory");
        Ok(Self {
            data_dir,
            lock_path,
            locks,
        })
    }

    fn create_lock(
        descriptor: &CoreDescriptor,
        data_dir: &Path,
        lock_path: &Path,
    ) -> Result<(), CoreError> {
        std::fs::create_dir_all(data_dir)?;
        let mut lock = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CoreError::Locked(lock_path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(lock, "{}", descriptor.name)?;
        Ok(())
    }
}

impl IndexCore for DirectoryCore {
    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn close(&self) -> Result<(), CoreError> {
        {
            let mut held = self.locks.lock();
            match held.get_mut(&self.data_dir) {
                Some(instances) if *instances > 1 => {
                    *instances -= 1;
                    return Ok(());
                }
                Some(_) => {
                    held.remove(&self.data_dir);
                }
                None => {}
            }
        }

        match std::fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(lock = %self.lock_path.display(), "core lock vanished before close");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
