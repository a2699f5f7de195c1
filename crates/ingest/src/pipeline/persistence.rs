//! Persistence stage
//!
//! Writes canonical records to the sink chosen by the batch strategy.
//!
//! * `rule`: per record, skip unresolved foreign keys and existing ids,
//!   insert the rest into the relational table named after the data type.
//! * `policy`: render every record into a [`Document`] and send them to
//!   the vector store in chunks.
//!
//! Ids committed by earlier attempts of the same run are skipped, so a
//! retry never writes a record twice. A retryable store error ends the
//! attempt and sets `save_failed`; a non-retryable one only drops the
//! record (or chunk) it was raised for.

use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::{DocumentFormatter, PipelineMetrics, PipelineStage, StageMetrics, SummaryFormatter};
use crate::{
    config::PipelineConfig,
    error::IngestResult,
    schema::{schema_for, EntitySchema},
    state::{ProcessingState, StateUpdate, Step},
    storage::{RelationalStore, VectorStore},
    types::{CanonicalRecord, Document, ErrorStage, RecordError, RecordId, Strategy},
};

/// Outcome of one relational write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Inserted,
    Duplicate,
    MissingReference,
}

/// Persistence stage
pub struct Persister<'a> {
    relational: &'a dyn RelationalStore,
    vector: &'a dyn VectorStore,
    formatter: Box<dyn DocumentFormatter + 'a>,
    vector_batch_size: usize,
    metrics: StageMetrics,
}

impl<'a> Persister<'a> {
    /// Create a persister over borrowed stores
    #[must_use]
    pub fn new(
        config: &PipelineConfig,
        relational: &'a dyn RelationalStore,
        vector: &'a dyn VectorStore,
    ) -> Self {
        Self {
            relational,
            vector,
            formatter: Box::new(SummaryFormatter),
            vector_batch_size: config.vector_batch_size.max(1),
            metrics: StageMetrics::new(Step::Save),
        }
    }

    /// Replace the document formatter
    #[must_use]
    pub fn with_formatter(mut self, formatter: impl DocumentFormatter + 'a) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    async fn save_relational(&self, state: &ProcessingState) -> StateUpdate {
        let table = state.data_type().as_str();
        let schema = schema_for(state.data_type());
        let mut update = StateUpdate::default();
        let (mut duplicates, mut orphans, mut rejected) = (0_usize, 0_usize, 0_usize);
        let mut committed: HashSet<i64> = HashSet::new();

        for record in state.transformed_data() {
            if state.is_persisted(record.id) || committed.contains(&record.id) {
                continue;
            }
            match self.write_relational(table, schema, record).await {
                Ok(WriteOutcome::Inserted) => {
                    update.saved += 1;
                    update.persisted_ids.push(record.id);
                    committed.insert(record.id);
                }
                Ok(WriteOutcome::Duplicate) => duplicates += 1,
                Ok(WriteOutcome::MissingReference) => orphans += 1,
                Err(e) if !e.is_retryable() => {
                    error!(id = record.id, table, "record cannot be stored: {e}");
                    rejected += 1;
                }
                Err(e) => {
                    error!(id = record.id, table, "relational save failed: {e}");
                    update.save_failed = Some(true);
                    break;
                }
            }
        }

        update.save_failed.get_or_insert(false);
        info!(
            table,
            inserted = update.saved,
            duplicates,
            orphans,
            rejected,
            failed = update.save_failed == Some(true),
            "relational save attempt finished"
        );
        update
    }

    async fn write_relational(
        &self,
        table: &str,
        schema: &EntitySchema,
        record: &CanonicalRecord,
    ) -> IngestResult<WriteOutcome> {
        for fk in schema.foreign_keys {
            let Some(target) = record.get(fk.field).and_then(|value| value.as_i64()) else {
                continue;
            };
            if !self.relational.exists(fk.references.as_str(), target).await? {
                debug!(
                    id = record.id,
                    field = fk.field,
                    target,
                    "referenced {} missing, skipping",
                    fk.references
                );
                return Ok(WriteOutcome::MissingReference);
            }
        }

        if self.relational.exists(table, record.id).await? {
            debug!(id = record.id, table, "already stored, skipping");
            return Ok(WriteOutcome::Duplicate);
        }

        self.relational.insert(table, record).await?;
        Ok(WriteOutcome::Inserted)
    }

    async fn save_vector(&self, state: &ProcessingState) -> StateUpdate {
        let data_type = state.data_type();
        let mut update = StateUpdate::default();

        // Records whose formatting already failed in an earlier attempt stay excluded.
        let unformattable: HashSet<RecordId> = state
            .errors()
            .iter()
            .filter(|e| e.stage == ErrorStage::Format)
            .map(|e| e.record_id.clone())
            .collect();

        let mut documents: Vec<Document> = Vec::new();
        let mut ids: Vec<i64> = Vec::new();
        let mut queued: HashSet<i64> = HashSet::new();
        for record in state.transformed_data() {
            let record_id = RecordId::Int(record.id);
            if state.is_persisted(record.id)
                || queued.contains(&record.id)
                || unformattable.contains(&record_id)
            {
                continue;
            }
            match self.formatter.format(data_type, record) {
                Ok(document) => {
                    documents.push(document);
                    ids.push(record.id);
                    queued.insert(record.id);
                }
                Err(e) => {
                    warn!(id = record.id, "document formatting failed: {e}");
                    update
                        .errors
                        .push(RecordError::new(record_id, ErrorStage::Format, e.record_message()));
                }
            }
        }

        for (chunk, chunk_ids) in documents
            .chunks(self.vector_batch_size)
            .zip(ids.chunks(self.vector_batch_size))
        {
            match self.vector.add_documents(chunk).await {
                Ok(()) => {}
                Err(e) if !e.is_retryable() => {
                    error!(documents = chunk.len(), "chunk cannot be stored: {e}");
                    continue;
                }
                Err(e) => {
                    error!(documents = chunk.len(), "vector save failed: {e}");
                    update.save_failed = Some(true);
                    break;
                }
            }
            update.saved += chunk.len() as u64;
            update.persisted_ids.extend_from_slice(chunk_ids);
        }

        update.save_failed.get_or_insert(false);
        info!(
            stored = update.saved,
            format_errors = update.errors.len(),
            failed = update.save_failed == Some(true),
            "vector save attempt finished"
        );
        update
    }
}

#[async_trait]
impl<'a> PipelineStage for Persister<'a> {
    async fn process(&self, state: &ProcessingState) -> StateUpdate {
        let start = Instant::now();
        let update = match state.decided_strategy() {
            Strategy::Rule => self.save_relational(state).await,
            Strategy::Policy => self.save_vector(state).await,
        };

        let failed = update.errors.len() + usize::from(update.save_failed == Some(true));
        self.metrics
            .record(update.persisted_ids.len(), failed, start.elapsed());
        update
    }

    fn step(&self) -> Step {
        Step::Save
    }

    fn metrics(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for Persister<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister")
            .field("vector_batch_size", &self.vector_batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::storage::{InMemoryRelationalStore, InMemoryVectorStore};
    use crate::types::{Batch, DataType, EntityKind, FieldValue};
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        pub Relational {}

        #[async_trait]
        impl RelationalStore for Relational {
            async fn exists(&self, table: &str, id: i64) -> IngestResult<bool>;
            async fn insert(&self, table: &str, record: &CanonicalRecord) -> IngestResult<()>;
        }
    }

    fn team(id: i64, stadium_id: Option<i64>) -> CanonicalRecord {
        CanonicalRecord {
            id,
            fields: vec![
                ("id".to_string(), FieldValue::Integer(id)),
                ("team_code".to_string(), FieldValue::Text(format!("K{id:02}"))),
                ("team_name".to_string(), FieldValue::Text(format!("팀{id}"))),
                (
                    "stadium_id".to_string(),
                    stadium_id.map_or(FieldValue::Null, FieldValue::Integer),
                ),
            ],
        }
    }

    fn transformed_state(
        data_type: impl Into<DataType>,
        strategy: Strategy,
        records: Vec<CanonicalRecord>,
    ) -> ProcessingState {
        let mut state = ProcessingState::new(Batch::new(Vec::new(), data_type, strategy));
        state.apply(
            Step::Transform,
            StateUpdate {
                transformed_data: Some(records),
                ..StateUpdate::default()
            },
        );
        state
    }

    #[tokio::test]
    async fn test_duplicate_is_skipped_without_insert() {
        let mut store = MockRelational::new();
        store
            .expect_exists()
            .with(eq("team"), eq(1))
            .times(1)
            .returning(|_, _| Ok(true));
        store.expect_insert().never();
        let vectors = InMemoryVectorStore::new();

        let persister = Persister::new(&PipelineConfig::default(), &store, &vectors);
        let state = transformed_state(EntityKind::Team, Strategy::Rule, vec![team(1, None)]);
        let update = persister.process(&state).await;

        assert_eq!(update.saved, 0);
        assert_eq!(update.save_failed, Some(false));
        assert!(update.errors.is_empty());
    }

    #[tokio::test]
    async fn test_missing_foreign_key_skips_record() {
        let mut store = MockRelational::new();
        store
            .expect_exists()
            .with(eq("stadium"), eq(99))
            .times(1)
            .returning(|_, _| Ok(false));
        store.expect_insert().never();
        let vectors = InMemoryVectorStore::new();

        let persister = Persister::new(&PipelineConfig::default(), &store, &vectors);
        let state = transformed_state(EntityKind::Team, Strategy::Rule, vec![team(1, Some(99))]);
        let update = persister.process(&state).await;

        assert_eq!(update.saved, 0);
        assert_eq!(update.save_failed, Some(false));
    }

    #[tokio::test]
    async fn test_store_error_stops_attempt() {
        let mut store = MockRelational::new();
        store
            .expect_exists()
            .returning(|_, _| Err(IngestError::store("exists", "connection reset")));
        store.expect_insert().never();
        let vectors = InMemoryVectorStore::new();

        let persister = Persister::new(&PipelineConfig::default(), &store, &vectors);
        let state = transformed_state(
            EntityKind::Team,
            Strategy::Rule,
            vec![team(1, None), team(2, None)],
        );
        let update = persister.process(&state).await;

        assert_eq!(update.save_failed, Some(true));
        assert_eq!(update.saved, 0);
        assert!(update.errors.is_empty());
    }

    #[tokio::test]
    async fn test_non_retryable_error_drops_only_that_record() {
        let mut store = MockRelational::new();
        store.expect_exists().returning(|_, _| Ok(false));
        store
            .expect_insert()
            .withf(|_, record| record.id == 1)
            .times(1)
            .returning(|_, _| Err(IngestError::configuration("column type mismatch")));
        store
            .expect_insert()
            .withf(|_, record| record.id == 2)
            .times(1)
            .returning(|_, _| Ok(()));
        let vectors = InMemoryVectorStore::new();

        let persister = Persister::new(&PipelineConfig::default(), &store, &vectors);
        let state = transformed_state(
            EntityKind::Team,
            Strategy::Rule,
            vec![team(1, None), team(2, None)],
        );
        let update = persister.process(&state).await;

        assert_eq!(update.save_failed, Some(false));
        assert_eq!(update.saved, 1);
        assert_eq!(update.persisted_ids, vec![2]);
    }

    #[tokio::test]
    async fn test_repeated_ids_in_one_batch_are_written_once() {
        let store = InMemoryRelationalStore::new();
        let vectors = InMemoryVectorStore::new();
        let persister = Persister::new(&PipelineConfig::default(), &store, &vectors);

        let state = transformed_state(
            EntityKind::Team,
            Strategy::Policy,
            vec![team(1, None), team(2, None), team(1, None)],
        );
        let update = persister.process(&state).await;

        assert_eq!(update.saved, 2);
        assert_eq!(update.persisted_ids, vec![1, 2]);
        assert_eq!(vectors.len(), 2);
    }

    #[tokio::test]
    async fn test_relational_insert_and_skip_persisted() {
        let store = InMemoryRelationalStore::new();
        store.seed_ids("stadium", [10]);
        let vectors = InMemoryVectorStore::new();
        let persister = Persister::new(&PipelineConfig::default(), &store, &vectors);

        let mut state = transformed_state(
            EntityKind::Team,
            Strategy::Rule,
            vec![team(1, Some(10)), team(2, None)],
        );
        state.apply(
            Step::Save,
            StateUpdate {
                saved: 1,
                persisted_ids: vec![1],
                ..StateUpdate::default()
            },
        );

        let update = persister.process(&state).await;
        assert_eq!(update.saved, 1);
        assert_eq!(update.persisted_ids, vec![2]);
        assert_eq!(store.len("team"), 1);
    }

    struct RejectOdd;

    impl DocumentFormatter for RejectOdd {
        fn format(&self, data_type: &DataType, record: &CanonicalRecord) -> IngestResult<Document> {
            if record.id % 2 == 1 {
                Err(IngestError::format(data_type.as_str(), "odd ids are not describable"))
            } else {
                SummaryFormatter.format(data_type, record)
            }
        }
    }

    #[tokio::test]
    async fn test_vector_chunks_and_format_errors() {
        let store = InMemoryRelationalStore::new();
        let vectors = InMemoryVectorStore::new();
        let config = PipelineConfig {
            vector_batch_size: 2,
            ..PipelineConfig::default()
        };
        let persister = Persister::new(&config, &store, &vectors).with_formatter(RejectOdd);

        let state = transformed_state(
            EntityKind::Team,
            Strategy::Policy,
            (1..=6).map(|id| team(id, None)).collect(),
        );
        let update = persister.process(&state).await;

        assert_eq!(update.saved, 3);
        assert_eq!(update.persisted_ids, vec![2, 4, 6]);
        assert_eq!(update.errors.len(), 3);
        assert!(update.errors.iter().all(|e| e.stage == ErrorStage::Format));
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors.add_calls(), 2);
        assert!(store.is_empty("team"));
    }

    #[tokio::test]
    async fn test_vector_failure_keeps_committed_chunks() {
        let store = InMemoryRelationalStore::new();
        let vectors = InMemoryVectorStore::new();
        let config = PipelineConfig {
            vector_batch_size: 2,
            ..PipelineConfig::default()
        };
        let persister = Persister::new(&config, &store, &vectors);
        let state = transformed_state(
            EntityKind::Team,
            Strategy::Policy,
            (1..=4).map(|id| team(id, None)).collect(),
        );

        vectors.fail_next(1);
        let update = persister.process(&state).await;
        assert_eq!(update.save_failed, Some(true));
        assert_eq!(update.saved, 0);

        let mut state = state;
        state.apply(Step::Save, update);
        let retry = persister.process(&state).await;
        assert_eq!(retry.save_failed, Some(false));
        assert_eq!(retry.saved, 4);
        assert_eq!(vectors.len(), 4);
    }
}
