//! Domain layer: core identity, the registry, and the event system.
//!
//! This module contains the lifecycle model: core identity and
//! descriptors, the loaded-core aggregate, the transient LRU cache, the
//! synchronized registry with its operation guard and shutdown drain, and
//! the event bus for broadcasting lifecycle transitions.

pub mod core_event;
pub mod core_handle;
pub mod core_id;
pub mod descriptor;
pub mod event_bus;
pub mod registry;
pub mod resource;
pub mod transient_cache;

pub use core_event::CoreEvent;
pub use core_handle::{CoreHandle, CoreSummary, close_off_thread};
pub use core_id::CoreId;
pub use descriptor::{CloudDescriptor, CoreDescriptor};
pub use event_bus::EventBus;
pub use registry::{
    CoreRegistry, DrainReport, Lookup, NameLease, PersistedCore, RegistrySnapshot, RemovedEntry,
};
pub use resource::{CoreLoader, CoreState, IndexCore, StateNotifier};
pub use transient_cache::{InsertOutcome, TransientCache};
