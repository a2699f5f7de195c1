//! Integration tests for the ingestion pipeline
//!
//! End-to-end runs against the in-memory stores, covering the batch
//! scenarios and the retry loop.

#![allow(clippy::unwrap_used)] // Tests are allowed to use unwrap for simplicity
#![allow(clippy::expect_used)] // Tests are allowed to use expect for simplicity
#![allow(clippy::panic)] // Tests are allowed to panic
#![allow(clippy::unreadable_literal)] // Test data can have unreadable literals

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;

use matchday_ingest::{
    Batch, CanonicalRecord, DataType, Document, DocumentFormatter, EntityKind, ErrorStage,
    IngestError, IngestResult, IngestionPipeline, InMemoryRelationalStore, InMemoryVectorStore,
    PipelineConfig, PipelineResult, ProcessingState, Record, RecordId, RelationalStore,
    SaveStatus, Strategy, SummaryFormatter, MAX_RETRY_COUNT,
};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("test record must be an object, got {other}"),
    }
}

fn player(id: i64, name: &str, team_id: Option<i64>) -> Record {
    let mut raw = record(json!({"id": id, "player_name": name, "position": "FW", "back_no": 9}));
    if let Some(team_id) = team_id {
        raw.insert("team_id".to_string(), json!(team_id));
    }
    raw
}

fn team(id: i64, name: &str) -> Record {
    record(json!({"id": id, "team_code": format!("K{id:02}"), "team_name": name}))
}

fn stadium(id: i64, name: &str) -> Record {
    record(json!({"id": id, "stadium_code": format!("S{id:02}"), "stadium_name": name}))
}

fn pipeline<'a>(
    db: &'a InMemoryRelationalStore,
    vectors: &'a InMemoryVectorStore,
) -> IngestionPipeline<'a> {
    IngestionPipeline::new(PipelineConfig::default(), db, vectors).expect("default config is valid")
}

fn result_of(state: &ProcessingState) -> &PipelineResult {
    state.result().expect("finalizer always produces a result")
}

/// Three players, one without `team_id`: one error, two validated
#[tokio::test]
async fn test_scenario_a_missing_required_field() {
    let db = InMemoryRelationalStore::new();
    db.seed_ids("team", [1]);
    let vectors = InMemoryVectorStore::new();

    let batch = Batch::new(
        vec![
            player(1, "이동국", Some(1)),
            player(2, "김병지", None),
            player(3, "최진철", Some(1)),
        ],
        EntityKind::Player,
        Strategy::Rule,
    );
    let state = pipeline(&db, &vectors).run(batch).await;
    let result = result_of(&state);

    assert_eq!(state.validated_data().len(), 2);
    assert_eq!(result.total, 3);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].record_id, RecordId::Int(2));
    assert_eq!(result.errors[0].stage, ErrorStage::Validate);
    assert_eq!(result.errors[0].error_message, "required field(s) missing: team_id");
    assert_eq!(result.db, 2);
    assert_eq!(db.len("player"), 2);
}

/// Teams already present are skipped silently
#[tokio::test]
async fn test_scenario_b_existing_rows_are_skipped() {
    let db = InMemoryRelationalStore::new();
    db.seed_ids("team", [1, 2]);
    let vectors = InMemoryVectorStore::new();

    let batch = Batch::new(
        vec![team(1, "울산현대"), team(2, "포항스틸러스")],
        EntityKind::Team,
        Strategy::Rule,
    );
    let state = pipeline(&db, &vectors).run(batch).await;
    let result = result_of(&state);

    assert_eq!(result.db, 0);
    assert_eq!(result.processed, 0);
    assert!(result.errors.is_empty());
    assert_eq!(result.status, SaveStatus::Saved);
    assert_eq!(db.insert_calls(), 0);
}

struct FailOn(i64);

impl DocumentFormatter for FailOn {
    fn format(&self, data_type: &DataType, record: &CanonicalRecord) -> IngestResult<Document> {
        if record.id == self.0 {
            Err(IngestError::format(data_type.as_str(), "embedding text unavailable"))
        } else {
            SummaryFormatter.format(data_type, record)
        }
    }
}

/// Vector mode with one unformattable record
#[tokio::test]
async fn test_scenario_c_formatter_failure_is_per_record() {
    let db = InMemoryRelationalStore::new();
    let vectors = InMemoryVectorStore::new();
    let pipeline = pipeline(&db, &vectors).with_formatter(FailOn(3));

    let batch = Batch::new(
        (1..=5).map(|id| player(id, &format!("선수{id}"), Some(1))).collect(),
        EntityKind::Player,
        Strategy::Policy,
    );
    let state = pipeline.run(batch).await;
    let result = result_of(&state);

    assert_eq!(result.vector, 4);
    assert_eq!(result.db, 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].record_id, RecordId::Int(3));
    assert_eq!(result.errors[0].stage, ErrorStage::Format);
    assert_eq!(vectors.len(), 4);
    assert!(db.is_empty("player"));

    let first = vectors
        .documents()
        .into_iter()
        .find(|doc| doc.entity_id() == Some(1))
        .expect("document for player 1");
    assert_eq!(first.text, "선수: 선수1 | 소속팀ID: 1 | 포지션: FW | 등번호: 9");
}

/// Nothing reaches the vector store when every record fails formatting
#[tokio::test]
async fn test_all_records_unformattable_is_nothing_to_save() {
    let db = InMemoryRelationalStore::new();
    let vectors = InMemoryVectorStore::new();
    let pipeline = pipeline(&db, &vectors).with_formatter(FailOn(1));

    let batch = Batch::new(vec![stadium(1, "문수구장")], EntityKind::Stadium, Strategy::Policy);
    let state = pipeline.run(batch).await;
    let result = result_of(&state);

    assert_eq!(result.status, SaveStatus::NothingToSave);
    assert_eq!(result.processed, 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].stage, ErrorStage::Format);
    assert!(vectors.is_empty());
}

/// A store that keeps failing exhausts the retry budget
#[tokio::test]
async fn test_scenario_d_retry_exhausted() {
    let db = InMemoryRelationalStore::new();
    db.fail_next(4);
    let vectors = InMemoryVectorStore::new();

    let batch = Batch::new(vec![stadium(1, "문수축구경기장")], EntityKind::Stadium, Strategy::Rule);
    let state = pipeline(&db, &vectors).run(batch).await;
    let result = result_of(&state);

    assert!(state.save_failed());
    assert_eq!(state.save_retry_count(), MAX_RETRY_COUNT);
    assert_eq!(result.processed, 0);
    assert_eq!(result.status, SaveStatus::RetryExhausted);
    assert_eq!(result.retries, MAX_RETRY_COUNT);
    assert_eq!(
        state.processing_path(),
        " -> Validate -> ErrorHandler -> Transform -> Save -> Retry -> Save -> Retry -> Save -> Retry -> Finalize"
    );
    assert!(db.is_empty("stadium"));
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let db = InMemoryRelationalStore::new();
    db.fail_next(1);
    let vectors = InMemoryVectorStore::new();

    let batch = Batch::new(
        vec![stadium(1, "포항스틸야드"), stadium(2, "광양전용구장")],
        EntityKind::Stadium,
        Strategy::Rule,
    );
    let state = pipeline(&db, &vectors).run(batch).await;
    let result = result_of(&state);

    assert_eq!(result.status, SaveStatus::SavedAfterRetry);
    assert_eq!(result.retries, 1);
    assert_eq!(result.db, 2);
    assert!(!state.save_failed());
    assert!(state.processing_path().ends_with("-> Save -> Retry -> Save -> Finalize"));
}

/// Relational store that fails the first insert of one id
struct FlakyInsert {
    inner: InMemoryRelationalStore,
    fail_id: i64,
    tripped: Mutex<HashSet<i64>>,
}

#[async_trait]
impl RelationalStore for FlakyInsert {
    async fn exists(&self, table: &str, id: i64) -> IngestResult<bool> {
        self.inner.exists(table, id).await
    }

    async fn insert(&self, table: &str, record: &CanonicalRecord) -> IngestResult<()> {
        if record.id == self.fail_id && self.tripped.lock().insert(record.id) {
            return Err(IngestError::store("insert", "connection reset"));
        }
        self.inner.insert(table, record).await
    }
}

#[tokio::test]
async fn test_partial_attempt_is_not_written_twice() {
    let db = FlakyInsert {
        inner: InMemoryRelationalStore::new(),
        fail_id: 3,
        tripped: Mutex::new(HashSet::new()),
    };
    let vectors = InMemoryVectorStore::new();
    let pipeline = IngestionPipeline::new(PipelineConfig::default(), &db, &vectors)
        .expect("default config is valid");

    let batch = Batch::new(
        (1..=5).map(|id| stadium(id, &format!("경기장{id}"))).collect(),
        EntityKind::Stadium,
        Strategy::Rule,
    );
    let state = pipeline.run(batch).await;
    let result = result_of(&state);

    assert_eq!(result.db, 5);
    assert_eq!(result.status, SaveStatus::SavedAfterRetry);
    assert_eq!(db.inner.len("stadium"), 5);
    assert_eq!(db.inner.insert_calls(), 5);
}

#[tokio::test]
async fn test_rerun_of_same_batch_is_idempotent() {
    let db = InMemoryRelationalStore::new();
    let vectors = InMemoryVectorStore::new();
    let pipeline = pipeline(&db, &vectors);
    let batch = Batch::new(
        vec![stadium(1, "전주월드컵경기장"), stadium(2, "대전월드컵경기장")],
        EntityKind::Stadium,
        Strategy::Rule,
    );

    let first = pipeline.run(batch.clone()).await;
    let second = pipeline.run(batch).await;

    assert_eq!(result_of(&first).db, 2);
    assert_eq!(result_of(&second).db, 0);
    assert_eq!(db.len("stadium"), 2);
    assert_ne!(first.run_id(), second.run_id());
}

#[tokio::test]
async fn test_foreign_keys_gate_inserts() {
    let db = InMemoryRelationalStore::new();
    db.seed_ids("team", [1]);
    let vectors = InMemoryVectorStore::new();

    let batch = Batch::new(
        vec![player(1, "김남일", Some(1)), player(2, "안정환", Some(42))],
        EntityKind::Player,
        Strategy::Rule,
    );
    let state = pipeline(&db, &vectors).run(batch).await;
    let result = result_of(&state);

    assert_eq!(result.db, 1);
    assert!(result.errors.is_empty());
    assert!(db.row("player", 1).is_some());
    assert!(db.row("player", 2).is_none());
}

#[tokio::test]
async fn test_transform_errors_accumulate_after_validation_errors() {
    let db = InMemoryRelationalStore::new();
    db.seed_ids("team", [1]);
    let vectors = InMemoryVectorStore::new();

    let mut bad_back_no = player(3, "유상철", Some(1));
    bad_back_no.insert("back_no".to_string(), json!("six"));
    let batch = Batch::new(
        vec![player(1, "홍명보", Some(1)), player(2, "황선홍", None), bad_back_no],
        EntityKind::Player,
        Strategy::Rule,
    );
    let state = pipeline(&db, &vectors).run(batch).await;
    let result = result_of(&state);

    let stages: Vec<ErrorStage> = result.errors.iter().map(|e| e.stage).collect();
    assert_eq!(stages, vec![ErrorStage::Validate, ErrorStage::Transform]);
    assert_eq!(result.db, 1);
    assert_eq!(result.total, 3);
}

#[tokio::test]
async fn test_empty_batch_reaches_finalize() {
    let db = InMemoryRelationalStore::new();
    let vectors = InMemoryVectorStore::new();

    let state = pipeline(&db, &vectors)
        .run(Batch::new(Vec::new(), EntityKind::Schedule, Strategy::Policy))
        .await;
    let result = result_of(&state);

    assert_eq!(result.status, SaveStatus::NothingToSave);
    assert_eq!(result.total, 0);
    assert_eq!(
        result.processing_path,
        " -> Validate -> ErrorHandler -> Transform -> Save -> Finalize"
    );
}

#[tokio::test]
async fn test_unknown_data_type_uses_fallback_schema() {
    let db = InMemoryRelationalStore::new();
    let vectors = InMemoryVectorStore::new();

    let batch = Batch::new(
        vec![
            record(json!({"id": 1, "name": "김심판", "grade": 1})),
            record(json!({"name": "무명"})),
        ],
        "referee",
        Strategy::Policy,
    );
    let state = pipeline(&db, &vectors).run(batch).await;
    let result = result_of(&state);

    assert_eq!(result.vector, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(vectors.documents()[0].text, "referee: 1 | grade: 1 | name: 김심판");
}

#[tokio::test]
async fn test_result_serializes_with_status() {
    let db = InMemoryRelationalStore::new();
    let vectors = InMemoryVectorStore::new();
    let state = pipeline(&db, &vectors)
        .run(Batch::new(vec![stadium(7, "창원축구센터")], EntityKind::Stadium, Strategy::Rule))
        .await;

    let encoded = serde_json::to_value(result_of(&state)).expect("result serializes");
    assert_eq!(encoded["status"], json!("saved"));
    assert_eq!(encoded["data_type"], json!("stadium"));
    assert_eq!(encoded["strategy"], json!("rule"));
    assert_eq!(encoded["db"], json!(1));
}
