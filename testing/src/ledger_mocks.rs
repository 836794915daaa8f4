//! In-memory ledger for fast, deterministic tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Duration, Utc};
use governance_core::event::{EventType, GovernanceEvent};
use governance_core::ledger::{LedgerError, LedgerReader, ReadOptions};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// In-memory ledger.
///
/// [`InMemoryLedger::append`] assigns the next gapless sequence and derives
/// the event id, hash and timestamp from it, so two ledgers built from the
/// same appends hold identical events.
///
/// # Example
///
/// ```
/// use governance_testing::InMemoryLedger;
/// use governance_core::ledger::{LedgerReader, ReadOptions};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let ledger = InMemoryLedger::new();
/// ledger.append("petition.filed", json!({"petition_id": "p-1"}));
/// ledger.append("petition.acknowledged", json!({"petition_id": "p-1"}));
///
/// let batch = ledger.read_events(ReadOptions::from_sequence(2, 10)).await.unwrap();
/// assert_eq!(batch.len(), 1);
/// assert_eq!(ledger.get_max_sequence().await.unwrap(), 2);
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    events: Arc<RwLock<Vec<GovernanceEvent>>>,
    reads: Arc<AtomicUsize>,
    fail_from: Arc<RwLock<Option<u64>>>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event at the next sequence and return it.
    pub fn append(&self, event_type: &str, payload: Value) -> GovernanceEvent {
        let mut events = self.events.write().unwrap();
        let sequence = events.last().map_or(1, |last| last.sequence + 1);
        let event = Self::build(sequence, event_type, payload);
        events.push(event.clone());
        event
    }

    /// Append a pre-built event as-is.
    pub fn push(&self, event: GovernanceEvent) {
        self.events.write().unwrap().push(event);
    }

    /// Build the event [`InMemoryLedger::append`] would produce at `sequence`.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn build(sequence: u64, event_type: &str, payload: Value) -> GovernanceEvent {
        let base = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        GovernanceEvent {
            event_id: Uuid::from_u128(u128::from(sequence)),
            event_type: EventType::new(event_type),
            timestamp: base + Duration::seconds(sequence as i64),
            actor_id: "actor-system".to_string(),
            trace_id: format!("trace-{sequence}"),
            payload: match payload {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
            hash: format!("hash-{sequence:08}"),
            sequence,
        }
    }

    /// Every stored event in ledger order.
    #[must_use]
    pub fn events(&self) -> Vec<GovernanceEvent> {
        self.events.read().unwrap().clone()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Whether no event has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }

    /// Number of `read_events` and `get_max_sequence` calls served.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make every read that would return an event at or after `sequence` fail.
    pub fn fail_reads_from(&self, sequence: u64) {
        *self.fail_from.write().unwrap() = Some(sequence);
    }

    /// Undo [`InMemoryLedger::fail_reads_from`].
    pub fn heal(&self) {
        *self.fail_from.write().unwrap() = None;
    }
}

impl LedgerReader for InMemoryLedger {
    fn read_events(
        &self,
        options: ReadOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GovernanceEvent>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let start = options.start_sequence.unwrap_or(0);

            let batch: Vec<GovernanceEvent> = self
                .events
                .read()
                .unwrap()
                .iter()
                .filter(|event| event.sequence >= start)
                .skip(options.offset.unwrap_or(0))
                .take(options.limit)
                .cloned()
                .collect();

            if let Some(fail_from) = *self.fail_from.read().unwrap() {
                if batch.iter().any(|event| event.sequence >= fail_from) {
                    return Err(LedgerError::Database(format!(
                        "injected read failure at sequence {fail_from}"
                    )));
                }
            }

            Ok(batch)
        })
    }

    fn get_max_sequence(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .events
                .read()
                .unwrap()
                .last()
                .map_or(0, |event| event.sequence))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sequences_are_gapless_from_one() {
        let ledger = InMemoryLedger::new();
        for i in 0..5 {
            let event = ledger.append("actor.registered", json!({"actor_id": format!("a{i}")}));
            assert_eq!(event.sequence, i + 1);
        }
        assert_eq!(ledger.get_max_sequence().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_empty_ledger_max_sequence_is_zero() {
        assert_eq!(InMemoryLedger::new().get_max_sequence().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_respects_start_and_limit() {
        let ledger = InMemoryLedger::new();
        for _ in 0..10 {
            ledger.append("treasury.noop", json!({}));
        }

        let batch = ledger
            .read_events(ReadOptions::from_sequence(4, 3))
            .await
            .unwrap();
        let sequences: Vec<u64> = batch.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, [4, 5, 6]);

        let past_end = ledger
            .read_events(ReadOptions::from_sequence(11, 3))
            .await
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_only_hits_reads_that_reach_it() {
        let ledger = InMemoryLedger::new();
        for _ in 0..4 {
            ledger.append("treasury.noop", json!({}));
        }
        ledger.fail_reads_from(3);

        assert!(ledger.read_events(ReadOptions::from_sequence(1, 2)).await.is_ok());
        assert!(ledger.read_events(ReadOptions::from_sequence(1, 3)).await.is_err());

        ledger.heal();
        assert!(ledger.read_events(ReadOptions::from_sequence(1, 4)).await.is_ok());
    }

    #[test]
    fn test_identical_appends_build_identical_events() {
        let a = InMemoryLedger::build(3, "petition.filed", json!({"petition_id": "p"}));
        let b = InMemoryLedger::build(3, "petition.filed", json!({"petition_id": "p"}));
        assert_eq!(a, b);
    }
}
