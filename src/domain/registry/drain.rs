//! Shutdown drain.
//!
//! Each pass snapshots the permanent table, the transient cache and the
//! backlog, claims every name that no operation holds, closes the claimed
//! cores off-thread and only then takes them out of their collection.
//! Names held by in-flight operations are retried on a later pass.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use super::CoreRegistry;
use crate::domain::{CoreEvent, CoreHandle, CoreId, close_off_thread};

/// Outcome of [`CoreRegistry::drain_all`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Cores closed cleanly.
    pub closed: usize,
    /// Cores whose close failed.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Loaded,
    Transient,
    Backlog,
}

#[derive(Debug)]
struct Claim {
    source: Source,
    name: String,
    core: Arc<CoreHandle>,
}

impl CoreRegistry {
    /// Flags the registry as shutting down and wakes every waiter.
    ///
    /// Returns `true` for the call that started the shutdown.
    pub fn begin_shutdown(&self) -> bool {
        let started = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.shutting_down, true)
        };
        if started {
            tracing::info!("registry shutting down");
        }
        self.wakeup.notify_waiters();
        started
    }

    /// Closes every permanent, transient and backlogged core exactly once
    /// and empties those collections.
    ///
    /// Begins shutdown if it has not begun yet. Close failures are logged
    /// and counted, never propagated. Returns once all three collections
    /// are empty, which requires in-flight operations to release their
    /// names.
    pub async fn drain_all(&self) -> DrainReport {
        self.begin_shutdown();
        let mut report = DrainReport::default();
        let mut closed_ids: HashSet<CoreId> = HashSet::new();

        loop {
            let notified = self.wakeup.notified();
            let claims = self.claim_for_drain();
            if claims.is_empty() {
                if self.is_drained() {
                    break;
                }
                tracing::debug!("drain waiting for in-flight operations");
                notified.await;
                continue;
            }

            for claim in claims {
                // The same instance may be mapped under an alias.
                if closed_ids.insert(claim.core.id()) {
                    self.close_claimed(&claim, &mut report).await;
                }
                self.settle(&claim);
            }
        }

        tracing::info!(
            closed = report.closed,
            failed = report.failed,
            "registry drained"
        );
        report
    }

    async fn close_claimed(&self, claim: &Claim, report: &mut DrainReport) {
        let clean = match close_off_thread(Arc::clone(&claim.core)).await {
            Ok(()) => {
                report.closed += 1;
                true
            }
            Err(err) => {
                tracing::error!(core = %claim.name, error = %err, "failed to close core during shutdown");
                report.failed += 1;
                false
            }
        };
        let _ = self.event_bus.publish(CoreEvent::CoreClosed {
            name: claim.name.clone(),
            clean,
            timestamp: Utc::now(),
        });
    }

    /// Snapshots the three collections and marks every free name pending.
    fn claim_for_drain(&self) -> Vec<Claim> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let snapshot: Vec<Claim> = state
            .cores
            .iter()
            .map(|(name, core)| (Source::Loaded, name.clone(), core))
            .chain(
                state
                    .transient
                    .iter()
                    .map(|(name, core)| (Source::Transient, name.clone(), core)),
            )
            .chain(
                state
                    .backlog
                    .iter()
                    .map(|core| (Source::Backlog, core.name(), core)),
            )
            .map(|(source, name, core)| Claim {
                source,
                name,
                core: Arc::clone(core),
            })
            .collect();

        snapshot
            .into_iter()
            .filter(|claim| state.pending.insert(claim.name.clone()))
            .collect()
    }

    /// Removes a closed core from where it was claimed, then drops the
    /// claim.
    fn settle(&self, claim: &Claim) {
        let removed = {
            let mut state = self.state.lock();
            let removed = match claim.source {
                Source::Loaded => {
                    let same = state
                        .cores
                        .get(&claim.name)
                        .is_some_and(|c| Arc::ptr_eq(c, &claim.core));
                    same && state.cores.shift_remove(&claim.name).is_some()
                }
                Source::Transient => {
                    let same = state
                        .transient
                        .peek(&claim.name)
                        .is_some_and(|c| Arc::ptr_eq(c, &claim.core));
                    same && state.transient.remove(&claim.name).is_some()
                }
                Source::Backlog => state
                    .backlog
                    .iter()
                    .position(|c| Arc::ptr_eq(c, &claim.core))
                    .and_then(|index| state.backlog.remove(index))
                    .is_some(),
            };
            state.pending.remove(&claim.name);
            removed
        };
        if !removed {
            tracing::info!(core = %claim.name, source = ?claim.source, "drained core moved before removal");
        }
        self.wakeup.notify_waiters();
    }

    fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.cores.is_empty() && state.transient.is_empty() && state.backlog.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use super::*;
    use crate::domain::EventBus;
    use crate::error::RegistryError;
    use crate::testing::{CloseProbe, TestCore};

    fn registry(cap: Option<usize>) -> CoreRegistry {
        CoreRegistry::new(cap.and_then(NonZeroUsize::new), EventBus::new(256))
    }

    #[tokio::test]
    async fn drains_every_collection_exactly_once() {
        let reg = registry(Some(3));
        let mut probes: Vec<CloseProbe> = Vec::new();

        for i in 0..4 {
            let name = format!("p{i}");
            let (core, probe) = if i % 2 == 0 {
                TestCore::failing_handle(&name)
            } else {
                TestCore::handle(&name)
            };
            assert!(reg.put(&name, core).is_ok());
            probes.push(probe);
        }
        // Five transient inserts into a cache of three leave two in the backlog.
        for i in 0..5 {
            let name = format!("t{i}");
            let (core, probe) = if i == 1 {
                TestCore::failing_handle(&name)
            } else {
                TestCore::handle(&name)
            };
            assert!(reg.put_transient(&name, core).is_ok());
            probes.push(probe);
        }
        assert_eq!(reg.loaded_len(), 4);
        assert_eq!(reg.transient_len(), 3);
        assert_eq!(reg.backlog_len(), 2);

        let report = reg.drain_all().await;

        assert_eq!(report.closed + report.failed, 9);
        assert_eq!(report.failed, 3);
        for probe in &probes {
            assert_eq!(probe.closes(), 1);
        }
        assert_eq!(reg.loaded_len(), 0);
        assert_eq!(reg.transient_len(), 0);
        assert_eq!(reg.backlog_len(), 0);
        assert!(reg.is_shutting_down());
    }

    #[tokio::test]
    async fn aliased_core_is_closed_once() {
        let reg = registry(None);
        let (core, probe) = TestCore::handle("a");
        assert!(reg.put("a", Arc::clone(&core)).is_ok());
        assert!(reg.put("alias", core).is_ok());

        let report = reg.drain_all().await;
        assert_eq!(report.closed, 1);
        assert_eq!(probe.closes(), 1);
        assert_eq!(reg.loaded_len(), 0);
    }

    #[tokio::test]
    async fn mutations_are_refused_after_shutdown() {
        let reg = registry(Some(2));
        assert!(reg.begin_shutdown());
        assert!(!reg.begin_shutdown());

        let (core, _) = TestCore::handle("late");
        assert!(matches!(
            reg.put("late", Arc::clone(&core)),
            Err(RegistryError::ShuttingDown)
        ));
        assert!(matches!(
            reg.put_transient("late", Arc::clone(&core)),
            Err(RegistryError::ShuttingDown)
        ));
        assert!(matches!(
            reg.add_created(core),
            Err(RegistryError::ShuttingDown)
        ));
        assert!(matches!(
            reg.rename("a", "b"),
            Err(RegistryError::ShuttingDown)
        ));
        assert!(reg.core_to_close().is_none());
        assert_eq!(reg.drain_all().await, DrainReport::default());
    }

    #[tokio::test]
    async fn pending_name_delays_drain_until_released() {
        let reg = Arc::new(registry(None));
        let (core, probe) = TestCore::handle("busy");
        assert!(reg.put("busy", core).is_ok());
        assert!(reg.wait_for_exclusive_access("busy").await.is_ok());

        let drain = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.drain_all().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drain.is_finished());
        assert_eq!(probe.closes(), 0);

        reg.release("busy");
        let Ok(Ok(report)) = tokio::time::timeout(Duration::from_secs(1), drain).await else {
            panic!("drain never finished");
        };
        assert_eq!(report.closed, 1);
        assert_eq!(probe.closes(), 1);
    }

    #[tokio::test]
    async fn drain_publishes_closed_events() {
        let reg = registry(None);
        let mut rx = reg.event_bus().subscribe();
        let (core, _) = TestCore::failing_handle("broken");
        assert!(reg.put("broken", core).is_ok());

        let _ = reg.drain_all().await;
        let Ok(CoreEvent::CoreClosed { name, clean, .. }) = rx.recv().await else {
            panic!("expected a close event");
        };
        assert_eq!(name, "broken");
        assert!(!clean);
    }
}
