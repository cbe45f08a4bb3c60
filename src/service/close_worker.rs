//! Background task that closes evicted transient cores.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{CoreEvent, CoreRegistry, close_off_thread};

/// Drains the registry's eviction backlog until shutdown.
///
/// Each worker takes one closeable core at a time, so several workers can
/// share a backlog without closing the same core twice.
#[derive(Debug)]
pub struct CloseWorker {
    id: usize,
    registry: Arc<CoreRegistry>,
}

impl CloseWorker {
    /// Creates worker number `id` over `registry`.
    #[must_use]
    pub fn new(id: usize, registry: Arc<CoreRegistry>) -> Self {
        Self { id, registry }
    }

    /// Runs until the registry begins shutting down. A failed close is
    /// logged and the loop continues.
    pub async fn run(self) {
        tracing::debug!(worker = self.id, "close worker started");
        while let Some(core) = self.registry.next_core_to_close().await {
            let name = core.name();
            let clean = match close_off_thread(core).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!(worker = self.id, core = %name, error = %err, "failed to close evicted core");
                    false
                }
            };
            let _ = self.registry.event_bus().publish(CoreEvent::CoreClosed {
                name: name.clone(),
                clean,
                timestamp: Utc::now(),
            });
            tracing::debug!(worker = self.id, core = %name, clean, "closed evicted core");
            self.registry.release(&name);
        }
        tracing::debug!(worker = self.id, "close worker stopped");
    }
}
