//! Record validation stage
//!
//! Checks that every required field of the batch schema is present and
//! non-null and that `id` is an integer or a string. Failing records are
//! dropped with a [`RecordError`]; the rest pass through unchanged.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::{info, warn};

use super::{PipelineMetrics, PipelineStage, StageMetrics};
use crate::{
    config::PipelineConfig,
    error::{IngestError, IngestResult},
    schema::{schema_for, EntitySchema},
    state::{ProcessingState, StateUpdate, Step},
    types::{ErrorStage, Record, RecordError, RecordId},
};

/// Validation stage
#[derive(Debug)]
pub struct Validator {
    preview_limit: usize,
    metrics: StageMetrics,
}

impl Validator {
    /// Create a validator
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            preview_limit: config.error_preview_limit,
            metrics: StageMetrics::new(Step::Validate),
        }
    }

    /// Validate one raw record against a schema
    ///
    /// # Errors
    ///
    /// Returns a validation error naming every missing required field, or
    /// the id type problem.
    pub fn validate_record(schema: &EntitySchema, record: &Record) -> IngestResult<()> {
        let missing: Vec<&str> = schema
            .required_fields()
            .filter(|field| record.get(*field).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            let fields = missing.join(", ");
            return Err(IngestError::validation(
                fields.clone(),
                format!("required field(s) missing: {fields}"),
            ));
        }

        // Booleans and floats are rejected even though JSON stores them as scalars.
        match record.get("id") {
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            Some(Value::String(_)) => Ok(()),
            _ => Err(IngestError::validation("id", "id must be int or str")),
        }
    }
}

#[async_trait]
impl PipelineStage for Validator {
    async fn process(&self, state: &ProcessingState) -> StateUpdate {
        let start = Instant::now();
        let schema = schema_for(state.data_type());
        let mut validated = Vec::with_capacity(state.data().len());
        let mut errors = Vec::new();

        for record in state.data() {
            match Self::validate_record(schema, record) {
                Ok(()) => validated.push(record.clone()),
                Err(e) => {
                    let record_id = RecordId::of(record);
                    warn!(%record_id, reason = %e.record_message(), "record rejected");
                    errors.push(RecordError::new(record_id, ErrorStage::Validate, e.record_message()));
                }
            }
        }

        if errors.is_empty() {
            info!(valid = validated.len(), "validation passed");
        } else {
            let preview: Vec<String> = errors
                .iter()
                .take(self.preview_limit)
                .map(ToString::to_string)
                .collect();
            warn!(
                valid = validated.len(),
                rejected = errors.len(),
                preview = ?preview,
                "validation rejected records"
            );
        }

        self.metrics.record(validated.len(), errors.len(), start.elapsed());
        StateUpdate {
            validated_data: Some(validated),
            errors,
            ..StateUpdate::default()
        }
    }

    fn step(&self) -> Step {
        Step::Validate
    }

    fn metrics(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }
}
