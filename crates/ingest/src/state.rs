//! Processing State
//!
//! The context threaded through one pipeline run. Stages never mutate it
//! directly: each returns a [`StateUpdate`] and the driver merges it with
//! [`ProcessingState::apply`], which also extends the processing path.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::types::{
    Batch, CanonicalRecord, DataType, PipelineResult, Record, RecordError, Strategy,
};

/// Pipeline graph nodes, as recorded in the processing path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Required-field and id checks
    Validate,
    /// Error summary logging
    ErrorHandler,
    /// Canonical coercion
    Transform,
    /// Relational or vector write
    Save,
    /// Retry bookkeeping after a failed save
    Retry,
    /// Result aggregation
    Finalize,
}

impl Step {
    /// Name appended to the processing path
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "Validate",
            Self::ErrorHandler => "ErrorHandler",
            Self::Transform => "Transform",
            Self::Save => "Save",
            Self::Retry => "Retry",
            Self::Finalize => "Finalize",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delta produced by one stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    /// Replaces `validated_data`
    pub validated_data: Option<Vec<Record>>,
    /// Replaces `transformed_data`
    pub transformed_data: Option<Vec<CanonicalRecord>>,
    /// Appended to `errors`
    pub errors: Vec<RecordError>,
    /// Added to `saved_count`
    pub saved: u64,
    /// Ids committed by this save attempt
    pub persisted_ids: Vec<i64>,
    /// Replaces `save_failed`
    pub save_failed: Option<bool>,
    /// Replaces `save_retry_count` (never lowers it)
    pub save_retry_count: Option<u32>,
    /// Terminal result; accepted from the finalizer only
    pub result: Option<PipelineResult>,
}

impl StateUpdate {
    /// Update that changes nothing besides the processing path
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Mutable context of a single pipeline invocation
#[derive(Debug, Clone)]
pub struct ProcessingState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    data: Vec<Record>,
    data_type: DataType,
    decided_strategy: Strategy,
    validated_data: Vec<Record>,
    transformed_data: Vec<CanonicalRecord>,
    errors: Vec<RecordError>,
    processing_path: String,
    saved_count: u64,
    save_retry_count: u32,
    save_failed: bool,
    persisted_ids: BTreeSet<i64>,
    result: Option<PipelineResult>,
}

impl ProcessingState {
    /// Fresh state for a batch; every counter starts at zero
    #[must_use]
    pub fn new(batch: Batch) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            data: batch.data,
            data_type: batch.data_type,
            decided_strategy: batch.decided_strategy,
            validated_data: Vec::new(),
            transformed_data: Vec::new(),
            errors: Vec::new(),
            processing_path: String::new(),
            saved_count: 0,
            save_retry_count: 0,
            save_failed: false,
            persisted_ids: BTreeSet::new(),
            result: None,
        }
    }

    /// Merge a stage's delta and record the step in the processing path
    pub fn apply(&mut self, step: Step, update: StateUpdate) {
        self.processing_path.push_str(" -> ");
        self.processing_path.push_str(step.as_str());

        if let Some(validated) = update.validated_data {
            self.validated_data = validated;
        }
        if let Some(transformed) = update.transformed_data {
            self.transformed_data = transformed;
        }
        self.errors.extend(update.errors);
        self.saved_count += update.saved;
        self.persisted_ids.extend(update.persisted_ids);
        if let Some(failed) = update.save_failed {
            self.save_failed = failed;
        }
        if let Some(count) = update.save_retry_count {
            self.save_retry_count = self.save_retry_count.max(count);
        }
        if let Some(result) = update.result {
            if step == Step::Finalize {
                self.result = Some(result);
            } else {
                tracing::error!(%step, "ignoring result written outside the finalizer");
            }
        }
    }

    /// Invocation id
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Invocation start time
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Raw input records
    #[must_use]
    pub fn data(&self) -> &[Record] {
        &self.data
    }

    /// Batch data type
    #[must_use]
    pub const fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Sink decided upstream
    #[must_use]
    pub const fn decided_strategy(&self) -> Strategy {
        self.decided_strategy
    }

    /// Records that passed validation
    #[must_use]
    pub fn validated_data(&self) -> &[Record] {
        &self.validated_data
    }

    /// Canonical records ready for the sink
    #[must_use]
    pub fn transformed_data(&self) -> &[CanonicalRecord] {
        &self.transformed_data
    }

    /// Append-only record errors
    #[must_use]
    pub fn errors(&self) -> &[RecordError] {
        &self.errors
    }

    /// Executed steps, `" -> <Step>"` per step
    #[must_use]
    pub fn processing_path(&self) -> &str {
        &self.processing_path
    }

    /// Successful writes so far
    #[must_use]
    pub const fn saved_count(&self) -> u64 {
        self.saved_count
    }

    /// Failed save attempts counted by the retry coordinator
    #[must_use]
    pub const fn save_retry_count(&self) -> u32 {
        self.save_retry_count
    }

    /// Whether the last save attempt failed (and, after finalize, whether retries ran out)
    #[must_use]
    pub const fn save_failed(&self) -> bool {
        self.save_failed
    }

    /// Whether a record id was already committed during this run
    #[must_use]
    pub fn is_persisted(&self, id: i64) -> bool {
        self.persisted_ids.contains(&id)
    }

    /// Terminal result, present once the finalizer ran
    #[must_use]
    pub const fn result(&self) -> Option<&PipelineResult> {
        self.result.as_ref()
    }

    /// Consume the state and return the terminal result
    #[must_use]
    pub fn into_result(self) -> Option<PipelineResult> {
        self.result
    }
}
