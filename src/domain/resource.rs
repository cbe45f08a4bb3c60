//! Seams to the collaborators the registry drives but does not implement.
//!
//! Opening and closing the underlying index, and telling the cluster about
//! state changes, happen outside the registry lock and may block.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::CoreDescriptor;
use crate::error::CoreError;

/// An opened index resource.
pub trait IndexCore: fmt::Debug + Send + Sync {
    /// Directory holding the index data.
    fn data_dir(&self) -> &Path;

    /// Releases the resource.
    ///
    /// May block on I/O. The registry calls it at most once per resource and
    /// never while holding its lock.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the resource could not be released
    /// cleanly. The registry logs the failure and forgets the core anyway.
    fn close(&self) -> Result<(), CoreError>;
}

/// Opens cores from descriptors.
pub trait CoreLoader: fmt::Debug + Send + Sync {
    /// Constructs a loaded resource. Expensive; runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] on configuration or I/O failure.
    fn open(&self, descriptor: &CoreDescriptor) -> Result<Box<dyn IndexCore>, CoreError>;
}

/// Externally visible state of a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreState {
    /// Serving requests.
    Up,
    /// Going away.
    Down,
}

/// Best-effort sink for core state changes (e.g. a membership service).
pub trait StateNotifier: fmt::Debug + Send + Sync {
    /// Publishes `state` for the core described by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] if the notification could not be delivered.
    /// Callers log and continue.
    fn publish(&self, descriptor: &CoreDescriptor, state: CoreState) -> Result<(), CoreError>;
}
