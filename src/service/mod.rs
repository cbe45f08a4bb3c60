//! Service layer: lifecycle orchestration.
//!
//! [`CoreService`] coordinates core operations, delegates opening and
//! closing to the [`crate::domain::CoreLoader`] on the blocking pool, and
//! emits events through the [`crate::domain::EventBus`]. [`CloseWorker`]s
//! close evicted transient cores in the background.

pub mod close_worker;
pub mod core_service;

pub use close_worker::CloseWorker;
pub use core_service::CoreService;
