//! # core-registry
//!
//! Lifecycle registry for named, independently loadable search cores.
//!
//! The registry tracks permanently resident cores, a capacity-bounded LRU
//! cache of transient cores, descriptors of cores that are known but not
//! loaded, and cores evicted from the cache that still wait to be closed.
//! Lifecycle operations on one name are serialized; distinct names proceed
//! concurrently. Opening and closing happen on the blocking pool, never
//! under the registry lock.
//!
//! ## Architecture
//!
//! ```text
//! Callers / binary
//!     │
//!     ├── CoreService (service/)
//!     │       ├── CoreLoader ── DirectoryLoader (directory.rs)
//!     │       ├── StateNotifier
//!     │       └── CloseWorker ×N
//!     │
//!     ├── CoreRegistry (domain/registry/)
//!     │       ├── operation guard
//!     │       ├── TransientCache (LRU)
//!     │       └── shutdown drain
//!     │
//!     ├── EventBus (domain/)
//!     │
//!     └── Snapshot persistence (JSON file or PostgreSQL)
//! ```

pub mod config;
pub mod directory;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;

#[cfg(test)]
mod testing;
