//! Storage sinks
//!
//! Narrow interfaces to the relational and vector stores. The pipeline
//! borrows implementations from the caller and never shares them between
//! runs on its own.

use async_trait::async_trait;

use crate::{
    error::IngestResult,
    types::{CanonicalRecord, Document},
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryRelationalStore, InMemoryVectorStore};
#[cfg(feature = "postgres")]
pub use postgres::PostgresRelationalStore;

/// Relational sink used by the rule strategy
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Whether a row with this primary key exists in `table`
    async fn exists(&self, table: &str, id: i64) -> IngestResult<bool>;

    /// Insert a canonical record into `table`
    async fn insert(&self, table: &str, record: &CanonicalRecord) -> IngestResult<()>;
}

/// Vector sink used by the policy strategy
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and upsert documents
    async fn add_documents(&self, documents: &[Document]) -> IngestResult<()>;
}
