//! # Governance Testing
//!
//! Testing utilities for the governance projection engine.
//!
//! This crate provides:
//! - [`InMemoryLedger`]: a ledger double with deterministic ids, hashes and timestamps
//! - [`InMemoryProjectionBackend`]: a `HashMap`-based projection backend
//! - [`CountingBackend`]: a backend that only counts calls, for "no I/O happened" checks
//! - [`FixedClock`]: deterministic processing time
//! - [`properties`]: proptest strategies producing valid governance event streams
//!
//! ## Example
//!
//! ```
//! use governance_testing::InMemoryLedger;
//! use serde_json::json;
//!
//! let ledger = InMemoryLedger::new();
//! let created = ledger.append("executive.task.created", json!({"task_id": "task-1"}));
//! assert_eq!(created.sequence, 1);
//! assert_eq!(ledger.len(), 1);
//! ```

use chrono::{DateTime, Utc};
use governance_core::environment::Clock;

mod ledger_mocks;
mod projection_mocks;

pub use ledger_mocks::InMemoryLedger;
pub use projection_mocks::{CountingBackend, InMemoryProjectionBackend};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Arc;
    use std::sync::RwLock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use governance_testing::mocks::FixedClock;
    /// use governance_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock to a new instant.
        ///
        /// Clones share the same instant, so a clock handed to a store can be
        /// moved from the test body.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    impl Clock for FixedClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly tracing subscriber.
    ///
    /// Honors `RUST_LOG` and defaults to `warn`. Safe to call from every test;
    /// only the first call installs anything.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities
///
/// Strategies produce `(event_type, payload)` pairs that are valid according
/// to the governance lifecycles, ready to feed into
/// [`InMemoryLedger::append`](crate::InMemoryLedger::append).
pub mod properties {
    use governance_core::records::TaskState;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    /// One event to append: type string and payload.
    pub type EventSpec = (String, Value);

    /// Walk the task lifecycle from `pending`, choosing edges by index.
    fn task_walk(task_id: &str, choices: &[usize]) -> Vec<EventSpec> {
        let mut events = vec![(
            "executive.task.created".to_string(),
            json!({"task_id": task_id, "earl_id": "earl-1"}),
        )];

        let mut state = TaskState::Pending;
        for choice in choices {
            let next = state.allowed_transitions();
            if next.is_empty() {
                break;
            }
            state = next[choice % next.len()];
            events.push((
                format!("executive.task.{state}"),
                json!({"task_id": task_id}),
            ));
        }
        events
    }

    /// Interleave per-entity streams, keeping each stream's own order.
    fn interleave(mut streams: Vec<Vec<EventSpec>>, picks: &[usize]) -> Vec<EventSpec> {
        for stream in &mut streams {
            stream.reverse();
        }

        let mut merged = Vec::new();
        let mut round = 0;
        loop {
            let live: Vec<usize> = (0..streams.len())
                .filter(|&i| !streams[i].is_empty())
                .collect();
            if live.is_empty() {
                break;
            }
            let pick = picks.get(round % picks.len().max(1)).copied().unwrap_or(0);
            if let Some(event) = streams[live[pick % live.len()]].pop() {
                merged.push(event);
            }
            round += 1;
        }
        merged
    }

    /// A stream of valid task lifecycles for up to five tasks, interleaved,
    /// with actor registrations and unroutable events mixed in.
    pub fn governance_stream() -> impl Strategy<Value = Vec<EventSpec>> {
        (
            prop::collection::vec(prop::collection::vec(0usize..4, 0..6), 1..5),
            0usize..3,
            0usize..3,
            prop::collection::vec(0usize..16, 1..32),
        )
            .prop_map(|(walks, actors, noise, picks)| {
                let mut streams: Vec<Vec<EventSpec>> = walks
                    .iter()
                    .enumerate()
                    .map(|(i, choices)| task_walk(&format!("task-{i}"), choices))
                    .collect();

                streams.push(
                    (0..actors)
                        .map(|i| {
                            (
                                "actor.registered".to_string(),
                                json!({"actor_id": format!("actor-{i}"), "actor_type": "earl"}),
                            )
                        })
                        .collect(),
                );
                streams.push(
                    (0..noise)
                        .map(|i| {
                            (
                                "treasury.budget.approved".to_string(),
                                json!({"budget_id": format!("budget-{i}")}),
                            )
                        })
                        .collect(),
                );

                interleave(streams, &picks)
            })
    }

}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_fixed_clock_clones_share_time() {
        let clock = test_clock();
        let handle = clock.clone();
        let later = clock.now() + chrono::Duration::hours(1);
        handle.set(later);
        assert_eq!(clock.now(), later);
    }
}
