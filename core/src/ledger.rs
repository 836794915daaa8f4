//! Ledger reader port.
//!
//! The ledger is append-only and owned by another subsystem. The projection
//! engine consumes it through this read-only trait and has no way to write
//! to it.
//!
//! # Implementations
//!
//! - `PostgresLedgerReader` (in `governance-projections`): production adapter
//! - `InMemoryLedger` (in `governance-testing`): fast, deterministic tests

use crate::event::GovernanceEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised while reading the ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database connection or query failure.
    #[error("Ledger database error: {0}")]
    Database(String),

    /// A stored event could not be decoded into the wire shape.
    #[error("Ledger decode error at sequence {sequence}: {reason}")]
    Decode {
        /// Sequence of the undecodable row
        sequence: u64,
        /// What went wrong
        reason: String,
    },
}

/// Options for a ranged ledger read.
///
/// # Example
///
/// ```
/// use governance_core::ledger::ReadOptions;
///
/// let options = ReadOptions::from_sequence(101, 100);
/// assert_eq!(options.start_sequence, Some(101));
/// assert_eq!(options.limit, 100);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    /// Only return events with `sequence >= start_sequence`
    pub start_sequence: Option<u64>,
    /// Maximum number of events to return
    pub limit: usize,
    /// Number of matching events to skip
    pub offset: Option<usize>,
}

impl ReadOptions {
    /// Read up to `limit` events starting at `start_sequence` (inclusive).
    #[must_use]
    pub const fn from_sequence(start_sequence: u64, limit: usize) -> Self {
        Self {
            start_sequence: Some(start_sequence),
            limit,
            offset: None,
        }
    }
}

/// Read-only access to the governance ledger.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the orchestrator can hold
/// an `Arc<dyn LedgerReader>`.
pub trait LedgerReader: Send + Sync {
    /// Read events in ascending `sequence` order.
    ///
    /// An empty vector means there is nothing at or after the requested
    /// position.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be read or decoded.
    fn read_events(
        &self,
        options: ReadOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GovernanceEvent>, LedgerError>> + Send + '_>>;

    /// Highest sequence currently in the ledger (0 when empty).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be queried.
    fn get_max_sequence(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LedgerError>> + Send + '_>>;
}
