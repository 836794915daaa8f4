//! Projection engine for the governance ledger.
//!
//! # Overview
//!
//! This crate turns the ledger's event stream into queryable read models:
//! - **[`ProjectionStore`]**: idempotent apply, checkpoints and record access
//!   over any [`ProjectionBackend`](governance_core::projection::ProjectionBackend)
//! - **Handlers**: one [`RecordHandler`] per projection, folding routed
//!   updates into records
//! - **[`RebuildOrchestrator`]**: batched full and incremental replay, plus
//!   the live single-event path
//! - **[`GovernanceReadModel`]**: typed queries over the projections
//! - **`PostgreSQL`**: the ledger reader and the projection backend
//!
//! # CQRS Separation
//!
//! The ledger and the projections live in **separate databases**:
//!
//! ```text
//! Ledger DB (append-only)  →  RebuildOrchestrator  →  Projection DB (read)
//! ```
//!
//! Projections are disposable. Any of them can be dropped and rebuilt from
//! the ledger at any time with the same result.
//!
//! # Example
//!
//! ```
//! use governance_projections::{GovernanceReadModel, ProjectionStore, RebuildOrchestrator};
//! use governance_testing::{InMemoryLedger, InMemoryProjectionBackend};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let ledger = InMemoryLedger::new();
//! ledger.append("executive.task.created", json!({"task_id": "task-1", "cluster_id": "c-1"}));
//! ledger.append("executive.task.accepted", json!({"task_id": "task-1"}));
//!
//! let store = Arc::new(ProjectionStore::new(Arc::new(InMemoryProjectionBackend::new())));
//! let orchestrator =
//!     RebuildOrchestrator::new(Arc::new(ledger), store.clone()).with_default_handlers();
//! orchestrator.rebuild_all().await.unwrap();
//!
//! let task = GovernanceReadModel::new(store).get_task_state("task-1").await.unwrap().unwrap();
//! assert_eq!(task.current_state().as_str(), "accepted");
//! # });
//! ```

pub mod config;
pub mod handlers;
pub mod postgres;
pub mod queries;
pub mod rebuild;
pub mod store;

pub use config::{ConfigError, EngineConfig, PostgresConfig};
pub use handlers::{ProjectionHandler, RecordHandler, default_handlers};
pub use postgres::{PostgresLedgerReader, PostgresProjectionBackend};
pub use queries::GovernanceReadModel;
pub use rebuild::{
    DEFAULT_BATCH_SIZE, RebuildOrchestrator, RebuildPhase, RebuildResult, VerificationResult,
};
pub use store::ProjectionStore;
