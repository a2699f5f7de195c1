//! In-memory stores
//!
//! Map-backed sinks with failure injection. Used by the test-suite and by
//! the `ingest-batch` dry run.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::{RelationalStore, VectorStore};
use crate::{
    error::{IngestError, IngestResult},
    types::{CanonicalRecord, Document, Record},
};

/// Fails the next `n` store calls
#[derive(Debug, Default)]
struct FailureInjector {
    remaining: AtomicU32,
}

impl FailureInjector {
    fn arm(&self, count: u32) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> IngestResult<()> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(IngestError::store(operation, "injected failure"))
        } else {
            Ok(())
        }
    }
}

/// Relational store keeping one ordered map per table
#[derive(Debug, Default)]
pub struct InMemoryRelationalStore {
    tables: parking_lot::Mutex<HashMap<String, BTreeMap<i64, Record>>>,
    failures: FailureInjector,
    insert_calls: AtomicU64,
}

impl InMemoryRelationalStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload rows; an `id` key is added when missing
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = (i64, Record)>) {
        let mut tables = self.tables.lock();
        let entries = tables.entry(table.to_string()).or_default();
        for (id, mut row) in rows {
            row.entry("id").or_insert_with(|| id.into());
            entries.insert(id, row);
        }
    }

    /// Preload bare primary keys
    pub fn seed_ids(&self, table: &str, ids: impl IntoIterator<Item = i64>) {
        self.seed(table, ids.into_iter().map(|id| (id, Record::new())));
    }

    /// Fail the next `count` calls to `exists` or `insert`
    pub fn fail_next(&self, count: u32) {
        self.failures.arm(count);
    }

    /// Rows in `table`
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, BTreeMap::len)
    }

    /// Whether `table` has no rows
    #[must_use]
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Stored row by primary key
    #[must_use]
    pub fn row(&self, table: &str, id: i64) -> Option<Record> {
        self.tables
            .lock()
            .get(table)
            .and_then(|rows| rows.get(&id).cloned())
    }

    /// Number of successful inserts since creation
    #[must_use]
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn exists(&self, table: &str, id: i64) -> IngestResult<bool> {
        self.failures.check("exists")?;
        Ok(self
            .tables
            .lock()
            .get(table)
            .is_some_and(|rows| rows.contains_key(&id)))
    }

    async fn insert(&self, table: &str, record: &CanonicalRecord) -> IngestResult<()> {
        self.failures.check("insert")?;
        let mut tables = self.tables.lock();
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(&record.id) {
            return Err(IngestError::store(
                "insert",
                format!("duplicate key {} in {table}", record.id),
            ));
        }
        rows.insert(record.id, record.to_record());
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Vector store upserting documents by `entity_type:entity_id`
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    documents: parking_lot::Mutex<BTreeMap<String, Document>>,
    failures: FailureInjector,
    add_calls: AtomicU64,
}

impl InMemoryVectorStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls to `add_documents`
    pub fn fail_next(&self, count: u32) {
        self.failures.arm(count);
    }

    /// Stored document count
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    /// Whether no document is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored document, ordered by key
    #[must_use]
    pub fn documents(&self) -> Vec<Document> {
        self.documents.lock().values().cloned().collect()
    }

    /// Number of successful `add_documents` calls
    #[must_use]
    pub fn add_calls(&self) -> u64 {
        self.add_calls.load(Ordering::SeqCst)
    }

    fn key(document: &Document, fallback: usize) -> String {
        let entity_type = document
            .metadata
            .get("entity_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        document.entity_id().map_or_else(
            || format!("{entity_type}:#{fallback}"),
            |id| format!("{entity_type}:{id}"),
        )
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add_documents(&self, documents: &[Document]) -> IngestResult<()> {
        self.failures.check("add_documents")?;
        let mut stored = self.documents.lock();
        for document in documents {
            let key = Self::key(document, stored.len());
            stored.insert(key, document.clone());
        }
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
