//! Per-name mutual exclusion for lifecycle operations.
//!
//! A name is free when it is neither pending nor queued in the eviction
//! backlog. Waiters register for a wakeup *before* checking, so a release
//! that lands between the check and the `.await` is never lost.

use std::sync::Arc;

use super::CoreRegistry;
use crate::domain::CoreHandle;
use crate::error::RegistryError;

impl CoreRegistry {
    /// Waits until no other operation holds `name` and no core named `name`
    /// waits to be closed, then marks `name` pending.
    ///
    /// Returns whatever [`CoreRegistry::get_from_any_list`] resolves for
    /// `name` at that moment, which reflects any unload the caller waited
    /// through. Every `Ok` must be paired with [`CoreRegistry::release`].
    ///
    /// Dropping the returned future gives up without side effects.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ShuttingDown`] without marking anything if
    /// shutdown has begun or begins while waiting.
    pub async fn wait_for_exclusive_access(
        &self,
        name: &str,
    ) -> Result<Option<Arc<CoreHandle>>, RegistryError> {
        loop {
            let notified = self.wakeup.notified();
            {
                let mut state = self.state.lock();
                state.ensure_running()?;
                if !state.is_busy(name) {
                    state.pending.insert(name.to_string());
                    tracing::trace!(core = name, "acquired exclusive access");
                    return Ok(state.get_from_any_list(name));
                }
            }
            notified.await;
        }
    }

    /// Ends the operation on `name` and wakes every waiter.
    ///
    /// Releasing a name that is not pending is a caller bug; it is logged
    /// and otherwise ignored.
    pub fn release(&self, name: &str) {
        let was_pending = self.state.lock().pending.remove(name);
        if !was_pending {
            tracing::warn!(
                core = name,
                "tried to release a core name that was not pending"
            );
        }
        self.wakeup.notify_waiters();
    }

    /// RAII form of [`CoreRegistry::wait_for_exclusive_access`]: the name is
    /// released when the lease drops.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ShuttingDown`] if shutdown has begun.
    pub async fn lease(&self, name: &str) -> Result<NameLease<'_>, RegistryError> {
        let core = self.wait_for_exclusive_access(name).await?;
        Ok(NameLease {
            registry: self,
            name: name.to_string(),
            core,
        })
    }

    /// Takes the oldest backlog entry whose name is not pending, marks that
    /// name pending and hands the core to the caller for closing. The caller
    /// must [`CoreRegistry::release`] the core's name afterwards.
    ///
    /// Entries whose name is pending stay queued for a later pass. Returns
    /// `None` when nothing is closeable or shutdown has begun; the shutdown
    /// drain owns the backlog from then on.
    #[must_use]
    pub fn core_to_close(&self) -> Option<Arc<CoreHandle>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.shutting_down {
            return None;
        }
        let (index, name) = state.backlog.iter().enumerate().find_map(|(i, core)| {
            let name = core.name();
            (!state.pending.contains(&name)).then_some((i, name))
        })?;
        let core = state.backlog.remove(index)?;
        state.pending.insert(name);
        Some(core)
    }

    /// Waits for a closeable backlog entry; see
    /// [`CoreRegistry::core_to_close`]. Returns `None` once shutdown has
    /// begun.
    pub async fn next_core_to_close(&self) -> Option<Arc<CoreHandle>> {
        loop {
            let notified = self.wakeup.notified();
            if self.is_shutting_down() {
                return None;
            }
            if let Some(core) = self.core_to_close() {
                return Some(core);
            }
            notified.await;
        }
    }
}

/// Exclusive right to run one lifecycle operation on a name.
#[derive(Debug)]
pub struct NameLease<'a> {
    registry: &'a CoreRegistry,
    name: String,
    core: Option<Arc<CoreHandle>>,
}

impl NameLease<'_> {
    /// The leased name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Core resolved when the lease was granted.
    #[must_use]
    pub fn core(&self) -> Option<&Arc<CoreHandle>> {
        self.core.as_ref()
    }
}

impl Drop for NameLease<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.name);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready};

    use super::*;
    use crate::domain::{CoreDescriptor, EventBus};
    use crate::testing::TestCore;

    fn registry(cap: Option<usize>) -> CoreRegistry {
        CoreRegistry::new(cap.and_then(NonZeroUsize::new), EventBus::new(64))
    }

    #[tokio::test]
    async fn acquire_returns_current_core_and_marks_pending() {
        let reg = registry(None);
        let (core, _) = TestCore::handle("x");
        let id = core.id();
        assert!(reg.put("x", core).is_ok());

        let Ok(Some(found)) = reg.wait_for_exclusive_access("x").await else {
            panic!("expected the loaded core");
        };
        assert_eq!(found.id(), id);
        assert!(reg.is_pending("x"));

        reg.release("x");
        assert!(!reg.is_pending("x"));
    }

    #[test]
    fn second_acquire_blocks_until_release() {
        let reg = registry(None);

        let mut first = task::spawn(reg.wait_for_exclusive_access("x"));
        assert!(matches!(assert_ready!(first.poll()), Ok(None)));

        let mut second = task::spawn(reg.wait_for_exclusive_access("x"));
        assert_pending!(second.poll());
        let mut third = task::spawn(reg.wait_for_exclusive_access("x"));
        assert_pending!(third.poll());

        reg.release("x");
        assert!(second.is_woken());
        assert!(third.is_woken());

        assert!(assert_ready!(second.poll()).is_ok());
        // The name went to the second waiter; the third keeps waiting.
        assert_pending!(third.poll());

        reg.release("x");
        assert!(assert_ready!(third.poll()).is_ok());
        reg.release("x");
        assert!(!reg.is_pending("x"));
    }

    #[test]
    fn distinct_names_do_not_block_each_other() {
        let reg = registry(None);
        let mut x = task::spawn(reg.wait_for_exclusive_access("x"));
        let mut y = task::spawn(reg.wait_for_exclusive_access("y"));
        assert!(assert_ready!(x.poll()).is_ok());
        assert!(assert_ready!(y.poll()).is_ok());
    }

    #[tokio::test]
    async fn waiter_on_another_task_proceeds_after_release() {
        let reg = Arc::new(registry(None));
        assert!(reg.wait_for_exclusive_access("x").await.is_ok());

        let waiter = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                let res = reg.wait_for_exclusive_access("x").await;
                reg.release("x");
                res.is_ok()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        reg.release("x");
        let Ok(Ok(acquired)) = tokio::time::timeout(Duration::from_secs(1), waiter).await else {
            panic!("waiter never finished");
        };
        assert!(acquired);
    }

    #[test]
    fn queued_for_close_counts_as_busy() {
        let reg = registry(Some(1));
        let (a, _) = TestCore::handle("a");
        let (b, _) = TestCore::handle("b");
        assert!(reg.put_transient("a", a).is_ok());
        assert!(reg.put_transient("b", b).is_ok());
        assert_eq!(reg.backlog_names(), vec!["a"]);

        let mut waiter = task::spawn(reg.wait_for_exclusive_access("a"));
        assert_pending!(waiter.poll());

        let Some(closing) = reg.core_to_close() else {
            panic!("a should be closeable");
        };
        assert_eq!(closing.name(), "a");
        assert_pending!(waiter.poll());

        reg.release("a");
        assert!(waiter.is_woken());
        assert!(matches!(assert_ready!(waiter.poll()), Ok(None)));
    }

    #[test]
    fn shutdown_wakes_waiters_with_error() {
        let reg = registry(None);
        let mut holder = task::spawn(reg.wait_for_exclusive_access("x"));
        assert!(assert_ready!(holder.poll()).is_ok());

        let mut waiter = task::spawn(reg.wait_for_exclusive_access("x"));
        assert_pending!(waiter.poll());

        assert!(reg.begin_shutdown());
        assert!(waiter.is_woken());
        assert!(matches!(
            assert_ready!(waiter.poll()),
            Err(RegistryError::ShuttingDown)
        ));

        let mut late = task::spawn(reg.wait_for_exclusive_access("y"));
        assert!(matches!(
            assert_ready!(late.poll()),
            Err(RegistryError::ShuttingDown)
        ));
        assert!(!reg.is_pending("y"));
    }

    #[test]
    fn dropped_waiter_leaves_nothing_behind() {
        let reg = registry(None);
        let mut holder = task::spawn(reg.wait_for_exclusive_access("x"));
        assert!(assert_ready!(holder.poll()).is_ok());

        let mut waiter = task::spawn(reg.wait_for_exclusive_access("x"));
        assert_pending!(waiter.poll());
        drop(waiter);

        reg.release("x");
        assert!(!reg.is_pending("x"));
    }

    #[test]
    fn unmatched_release_is_tolerated() {
        let reg = registry(None);
        reg.release("never-acquired");
        assert!(!reg.is_pending("never-acquired"));
    }

    #[tokio::test]
    async fn lease_releases_on_drop() {
        let reg = registry(Some(2));
        reg.put_dynamic_descriptor(CoreDescriptor::new("t", "/cores/t").transient());
        let (core, _) = TestCore::handle("t");
        assert!(reg.put_transient("t", core).is_ok());

        {
            let Ok(lease) = reg.lease("t").await else {
                panic!("lease should be granted");
            };
            assert_eq!(lease.name(), "t");
            assert!(lease.core().is_some());
            assert!(reg.is_pending("t"));
        }
        assert!(!reg.is_pending("t"));
    }

    #[test]
    fn core_to_close_skips_pending_names() {
        let reg = registry(Some(1));
        for name in ["a", "b", "c"] {
            let (core, _) = TestCore::handle(name);
            assert!(reg.put_transient(name, core).is_ok());
        }
        assert_eq!(reg.backlog_names(), vec!["a", "b"]);

        // A reload is working on "a"; it must not be closed underneath it.
        reg.state.lock().pending.insert("a".to_string());

        let Some(first) = reg.core_to_close() else {
            panic!("b should be closeable");
        };
        assert_eq!(first.name(), "b");
        assert!(reg.core_to_close().is_none());
        assert_eq!(reg.backlog_names(), vec!["a"]);

        reg.release("a");
        let Some(second) = reg.core_to_close() else {
            panic!("a should be closeable now");
        };
        assert_eq!(second.name(), "a");
        assert_eq!(reg.backlog_len(), 0);
    }
}
