//! Matchday Ingest - Soccer Data Ingestion Pipeline
//!
//! Validates, normalizes and persists batches of soccer domain records
//! (players, teams, stadiums, schedules) into either a relational store or
//! a vector store, retrying failed saves a bounded number of times.

#![allow(clippy::option_if_let_else)] // Pattern matching reads better in stage routing
#![allow(clippy::single_match_else)] // Match expressions are clearer for outcome handling
#![allow(clippy::missing_fields_in_debug)] // Debug impls skip borrowed stores
#![allow(clippy::missing_errors_doc)] // Error documentation is handled at module level
#![allow(clippy::cast_precision_loss)] // Float range checks during coercion
#![allow(clippy::module_name_repetitions)]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     IngestionPipeline                        │
//! ├──────────┬──────────────┬───────────┬──────────┬─────────────┤
//! │ Validate │ ErrorHandler │ Transform │   Save   │  Finalize   │
//! │          │              │           │  ⇅ Retry │             │
//! ├──────────┴──────────────┴───────────┼──────────┴─────────────┤
//! │        Entity schema registry       │  RelationalStore /     │
//! │                                     │  VectorStore           │
//! └─────────────────────────────────────┴────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use matchday_ingest::{
//!     Batch, EntityKind, IngestionPipeline, InMemoryRelationalStore, InMemoryVectorStore,
//!     PipelineConfig, Record, Strategy,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = InMemoryRelationalStore::new();
//!     let vectors = InMemoryVectorStore::new();
//!     let pipeline = IngestionPipeline::new(PipelineConfig::default(), &db, &vectors)?;
//!
//!     let record: Record = serde_json::from_str(
//!         r#"{"id": 1, "stadium_code": "C06", "stadium_name": "포항스틸야드"}"#,
//!     )?;
//!     let state = pipeline
//!         .run(Batch::new(vec![record], EntityKind::Stadium, Strategy::Rule))
//!         .await;
//!
//!     let result = state.result().ok_or("no result")?;
//!     assert_eq!(result.db, 1);
//!     Ok(())
//! }
//! ```

// Public exports
pub use config::{PipelineConfig, MAX_RETRY_COUNT};
pub use error::{IngestError, IngestResult};
pub use types::*;

// Internal modules
pub mod config;
pub mod error;
pub mod schema;
pub mod state;
pub mod types;

// Sinks
pub mod storage;

// Pipeline processing
pub mod pipeline;

// Re-exports for convenience
pub use pipeline::{DocumentFormatter, IngestionPipeline, PipelineMetrics, SummaryFormatter};
pub use state::{ProcessingState, StateUpdate, Step};
pub use storage::{InMemoryRelationalStore, InMemoryVectorStore, RelationalStore, VectorStore};
#[cfg(feature = "postgres")]
pub use storage::PostgresRelationalStore;
