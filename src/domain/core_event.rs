//! Domain events reflecting core lifecycle transitions.
//!
//! Every lifecycle change emits a [`CoreEvent`] through the
//! [`super::EventBus`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CoreState;

/// Domain event emitted after every lifecycle transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A core was opened and registered.
    CoreLoaded {
        /// Core name.
        name: String,
        /// Whether it went into the transient cache.
        transient: bool,
        /// Load timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A core was removed and closed on request.
    CoreUnloaded {
        /// Core name.
        name: String,
        /// Unload timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A core was replaced by a freshly opened instance.
    CoreReloaded {
        /// Core name.
        name: String,
        /// Reload timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A core changed its name.
    CoreRenamed {
        /// Previous name.
        from: String,
        /// New name.
        to: String,
        /// Rename timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Two cores exchanged names.
    CoresSwapped {
        /// First name.
        first: String,
        /// Second name.
        second: String,
        /// Swap timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A transient core was pushed out of the cache and queued for close.
    CoreEvicted {
        /// Core name.
        name: String,
        /// Eviction timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A core's resources were released.
    CoreClosed {
        /// Core name.
        name: String,
        /// Whether the close succeeded.
        clean: bool,
        /// Close timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A core was published to the cluster in a new state.
    StateChanged {
        /// Core name.
        name: String,
        /// Published state.
        state: CoreState,
        /// Publication timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl CoreEvent {
    /// Returns the core name this event concerns. For swaps and renames,
    /// the first name involved.
    #[must_use]
    pub fn core_name(&self) -> &str {
        match self {
            Self::CoreLoaded { name, .. }
            | Self::CoreUnloaded { name, .. }
            | Self::CoreReloaded { name, .. }
            | Self::CoreEvicted { name, .. }
            | Self::CoreClosed { name, .. }
            | Self::StateChanged { name, .. } => name,
            Self::CoreRenamed { from, .. } => from,
            Self::CoresSwapped { first, .. } => first,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::CoreLoaded { .. } => "core_loaded",
            Self::CoreUnloaded { .. } => "core_unloaded",
            Self::CoreReloaded { .. } => "core_reloaded",
            Self::CoreRenamed { .. } => "core_renamed",
            Self::CoresSwapped { .. } => "cores_swapped",
            Self::CoreEvicted { .. } => "core_evicted",
            Self::CoreClosed { .. } => "core_closed",
            Self::StateChanged { .. } => "state_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicted_event_type() {
        let event = CoreEvent::CoreEvicted {
            name: "t1".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_type_str(), "core_evicted");
        assert_eq!(event.core_name(), "t1");
    }

    #[test]
    fn state_changed_serializes_with_tag() {
        let event = CoreEvent::StateChanged {
            name: "books".to_string(),
            state: CoreState::Down,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap_or_default();
        assert!(json.contains("\"event_type\":\"state_changed\""));
        assert!(json.contains("\"state\":\"down\""));
    }

    #[test]
    fn rename_reports_old_name() {
        let event = CoreEvent::CoreRenamed {
            from: "a".to_string(),
            to: "b".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.core_name(), "a");
    }
}
