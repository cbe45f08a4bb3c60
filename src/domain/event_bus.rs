//! Broadcast channel for domain events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. Lifecycle
//! transitions publish a [`CoreEvent`] through the bus. Publishing never
//! blocks, which is what lets the registry publish evictions right after
//! an insert.

use chrono::Utc;
use tokio::sync::broadcast;

use super::{CoreDescriptor, CoreEvent, CoreState, StateNotifier};
use crate::error::CoreError;

/// Broadcast bus for [`CoreEvent`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity
/// (default 10 000). When the ring buffer is full, the oldest events are
/// dropped for lagging receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// If there are no active receivers, the event is silently dropped.
    pub fn publish(&self, event: CoreEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl StateNotifier for EventBus {
    fn publish(&self, descriptor: &CoreDescriptor, state: CoreState) -> Result<(), CoreError> {
        let _ = EventBus::publish(
            self,
            CoreEvent::StateChanged {
                name: descriptor.name.clone(),
                state,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn make_event(name: &str) -> CoreEvent {
        CoreEvent::CoreLoaded {
            name: name.to_string(),
            transient: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = EventBus::new(100);
        assert_eq!(bus.publish(make_event("a")), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_event() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        bus.publish(make_event("books"));

        let Ok(event) = rx.recv().await else {
            panic!("expected to receive event");
        };
        assert_eq!(event.core_name(), "books");
    }

    #[tokio::test]
    async fn state_notifier_publishes_state_changed() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let notifier: &dyn StateNotifier = &bus;

        let desc = CoreDescriptor::new("books", "/srv/books");
        assert!(notifier.publish(&desc, CoreState::Down).is_ok());

        let Ok(CoreEvent::StateChanged { name, state, .. }) = rx.recv().await else {
            panic!("expected a state change");
        };
        assert_eq!(name, "books");
        assert_eq!(state, CoreState::Down);
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let bus = EventBus::new(100);
        assert_eq!(bus.receiver_count(), 0);
        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);
        drop(rx1);
        assert_eq!(bus.receiver_count(), 1);
    }
}
