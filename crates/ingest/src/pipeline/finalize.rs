//! Result aggregation
//!
//! Builds the run's [`PipelineResult`] from the accumulated state. The
//! only stage allowed to write `result`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::time::Instant;
use tracing::info;

use super::{PipelineMetrics, PipelineStage, StageMetrics};
use crate::{
    state::{ProcessingState, StateUpdate, Step},
    types::{ErrorStage, PipelineResult, RecordId, SaveStatus, Strategy},
};

/// Finalize stage
#[derive(Debug)]
pub struct Finalizer {
    metrics: StageMetrics,
}

impl Default for Finalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Finalizer {
    /// Create a finalizer
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: StageMetrics::new(Step::Finalize),
        }
    }

    /// How the save step ended for this state
    #[must_use]
    pub fn status(state: &ProcessingState) -> SaveStatus {
        if state.save_failed() {
            SaveStatus::RetryExhausted
        } else if !Self::any_record_reached_sink(state) {
            SaveStatus::NothingToSave
        } else if state.save_retry_count() > 0 {
            SaveStatus::SavedAfterRetry
        } else {
            SaveStatus::Saved
        }
    }

    /// Whether a canonical record was handed to the sink, i.e. it was not
    /// dropped while being formatted
    fn any_record_reached_sink(state: &ProcessingState) -> bool {
        let unformattable: HashSet<&RecordId> = state
            .errors()
            .iter()
            .filter(|e| e.stage == ErrorStage::Format)
            .map(|e| &e.record_id)
            .collect();
        state
            .transformed_data()
            .iter()
            .any(|record| !unformattable.contains(&RecordId::Int(record.id)))
    }

    /// Aggregate the terminal result
    #[must_use]
    pub fn build_result(state: &ProcessingState) -> PipelineResult {
        let saved = state.saved_count();
        let (db, vector) = match state.decided_strategy() {
            Strategy::Rule => (saved, 0),
            Strategy::Policy => (0, saved),
        };

        PipelineResult {
            run_id: state.run_id(),
            data_type: state.data_type().clone(),
            strategy: state.decided_strategy(),
            processed: saved,
            db,
            vector,
            total: state.data().len() as u64,
            errors: state.errors().to_vec(),
            status: Self::status(state),
            retries: state.save_retry_count(),
            processing_path: format!("{} -> {}", state.processing_path(), Step::Finalize),
            started_at: state.started_at(),
            finished_at: Utc::now(),
        }
    }
}

#[async_trait]
impl PipelineStage for Finalizer {
    async fn process(&self, state: &ProcessingState) -> StateUpdate {
        let start = Instant::now();
        let result = Self::build_result(state);

        info!(
            processed = result.processed,
            db = result.db,
            vector = result.vector,
            total = result.total,
            errors = result.errors.len(),
            retries = result.retries,
            status = ?result.status,
            "ingestion finished"
        );

        self.metrics.record(1, 0, start.elapsed());
        StateUpdate {
            result: Some(result),
            ..StateUpdate::default()
        }
    }

    fn step(&self) -> Step {
        Step::Finalize
    }

    fn metrics(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }
}
