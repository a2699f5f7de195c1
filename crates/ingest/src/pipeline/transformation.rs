//! Canonical transformation stage
//!
//! Coerces validated records into their schema's canonical shape:
//! integer fields become `i64`, text fields become trimmed strings and
//! blank optionals become `Null`. A record with any uncoercible field is
//! excluded with a transform error.

use async_trait::async_trait;
use serde_json::{Number, Value};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{PipelineMetrics, PipelineStage, StageMetrics};
use crate::{
    error::{IngestError, IngestResult},
    schema::{schema_for, EntitySchema, FieldKind, FieldSpec},
    state::{ProcessingState, StateUpdate, Step},
    types::{CanonicalRecord, ErrorStage, FieldValue, Record, RecordError, RecordId},
};

/// Transformation stage
#[derive(Debug)]
pub struct Transformer {
    metrics: StageMetrics,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer {
    /// Create a transformer
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: StageMetrics::new(Step::Transform),
        }
    }

    /// Coerce one record into its canonical form
    ///
    /// # Errors
    ///
    /// Returns a transform error for the first field that cannot be coerced.
    pub fn transform_record(schema: &EntitySchema, record: &Record) -> IngestResult<CanonicalRecord> {
        let mut fields = Vec::with_capacity(schema.fields.len());
        for spec in schema.fields {
            let value = coerce(spec, record.get(spec.name))?;
            fields.push((spec.name.to_string(), value));
        }

        if schema.passthrough {
            for (name, raw) in record {
                if schema.field(name).is_some() {
                    continue;
                }
                match passthrough_value(raw) {
                    Some(value) => fields.push((name.clone(), value)),
                    None => debug!(field = %name, "dropping non-scalar field"),
                }
            }
        }

        let id = fields
            .iter()
            .find(|(name, _)| name == "id")
            .and_then(|(_, value)| value.as_i64())
            .ok_or_else(|| IngestError::transform("id", "field 'id' must be an integer"))?;

        Ok(CanonicalRecord { id, fields })
    }
}

fn coerce(spec: &FieldSpec, raw: Option<&Value>) -> IngestResult<FieldValue> {
    let name = spec.name;
    let value = match raw {
        None | Some(Value::Null) => return blank(spec),
        Some(value) => value,
    };

    match (spec.kind, value) {
        (FieldKind::Integer, Value::Number(n)) => integer_from_number(n)
            .map(FieldValue::Integer)
            .ok_or_else(|| not_integer(name, value)),
        (FieldKind::Integer, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return blank(spec);
            }
            trimmed
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| not_integer(name, value))
        }
        (FieldKind::Integer, _) => Err(not_integer(name, value)),
        (FieldKind::Text, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                blank(spec)
            } else {
                Ok(FieldValue::Text(trimmed.to_string()))
            }
        }
        (FieldKind::Text, Value::Number(n)) => Ok(FieldValue::Text(n.to_string())),
        (FieldKind::Text, Value::Bool(b)) => Ok(FieldValue::Text(b.to_string())),
        (FieldKind::Text, _) => Err(IngestError::transform(
            name,
            format!("field '{name}' must be a scalar"),
        )),
    }
}

/// `Null` for optionals, an error for required fields
fn blank(spec: &FieldSpec) -> IngestResult<FieldValue> {
    if spec.required {
        Err(IngestError::transform(
            spec.name,
            format!("field '{}' must not be empty", spec.name),
        ))
    } else {
        Ok(FieldValue::Null)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn integer_from_number(n: &Number) -> Option<i64> {
    if let Some(v) = n.as_i64() {
        return Some(v);
    }
    // Integral floats such as 9.0 are accepted; u64 beyond i64 is not.
    let f = n.as_f64()?;
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (n.is_f64() && f.fract() == 0.0 && in_range).then_some(f as i64)
}

fn not_integer(name: &str, value: &Value) -> IngestError {
    IngestError::transform(name, format!("field '{name}' must be an integer, got {value}"))
}

fn passthrough_value(raw: &Value) -> Option<FieldValue> {
    match raw {
        Value::Null => Some(FieldValue::Null),
        Value::Number(n) => Some(
            n.as_i64()
                .map_or_else(|| FieldValue::Text(n.to_string()), FieldValue::Integer),
        ),
        Value::String(s) => {
            let trimmed = s.trim();
            Some(if trimmed.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(trimmed.to_string())
            })
        }
        Value::Bool(b) => Some(FieldValue::Text(b.to_string())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[async_trait]
impl PipelineStage for Transformer {
    async fn process(&self, state: &ProcessingState) -> StateUpdate {
        let start = Instant::now();
        let schema = schema_for(state.data_type());
        let mut transformed = Vec::with_capacity(state.validated_data().len());
        let mut errors = Vec::new();

        for record in state.validated_data() {
            match Self::transform_record(schema, record) {
                Ok(canonical) => transformed.push(canonical),
                Err(e) => {
                    let record_id = RecordId::of(record);
                    warn!(%record_id, reason = %e.record_message(), "record failed transform");
                    errors.push(RecordError::new(record_id, ErrorStage::Transform, e.record_message()));
                }
            }
        }

        info!(
            transformed = transformed.len(),
            failed = errors.len(),
            "transformation complete"
        );

        self.metrics.record(transformed.len(), errors.len(), start.elapsed());
        StateUpdate {
            transformed_data: Some(transformed),
            errors,
            ..StateUpdate::default()
        }
    }

    fn step(&self) -> Step {
        Step::Transform
    }

    fn metrics(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }
}
