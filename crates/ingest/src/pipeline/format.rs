//! Vector document formatting
//!
//! Renders a canonical record as `"<title label>: <title> | <label>: <value> | ..."`
//! using the schema labels, plus a null-free metadata map carrying
//! `entity_type` and `entity_id`.

use serde_json::Value;

use crate::{
    error::{IngestError, IngestResult},
    schema::{schema_for, EntitySchema},
    types::{CanonicalRecord, DataType, Document, Record},
};

const SEPARATOR: &str = " | ";

/// Turns canonical records into vector store documents
pub trait DocumentFormatter: Send + Sync {
    /// Render one record
    ///
    /// # Errors
    ///
    /// Returns a format error when the record cannot be described.
    fn format(&self, data_type: &DataType, record: &CanonicalRecord) -> IngestResult<Document>;
}

/// Default formatter driven by schema labels
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryFormatter;

impl DocumentFormatter for SummaryFormatter {
    fn format(&self, data_type: &DataType, record: &CanonicalRecord) -> IngestResult<Document> {
        let schema = schema_for(data_type);
        Ok(Document {
            text: describe(schema, data_type, record)?,
            metadata: metadata(data_type, record),
        })
    }
}

/// Natural-language line for one record
///
/// # Errors
///
/// Returns a format error if the title field is null.
pub fn describe(
    schema: &EntitySchema,
    data_type: &DataType,
    record: &CanonicalRecord,
) -> IngestResult<String> {
    let title = record
        .get(schema.title_field)
        .filter(|value| !value.is_null())
        .ok_or_else(|| {
            IngestError::format(
                data_type.as_str(),
                format!("record {} has no '{}'", record.id, schema.title_field),
            )
        })?;

    let title_label = if schema.title_label.is_empty() {
        data_type.as_str()
    } else {
        schema.title_label
    };
    let mut parts = vec![format!("{title_label}: {title}")];

    for (name, value) in &record.fields {
        if name == schema.title_field || value.is_null() {
            continue;
        }
        match schema.field(name) {
            Some(spec) => {
                if let Some(label) = spec.label {
                    parts.push(format!("{label}: {value}"));
                }
            }
            None if schema.passthrough => parts.push(format!("{name}: {value}")),
            None => {}
        }
    }

    Ok(parts.join(SEPARATOR))
}

/// Null-free metadata; `entity_type` and `entity_id` win over record fields
#[must_use]
pub fn metadata(data_type: &DataType, record: &CanonicalRecord) -> Record {
    let mut metadata = record.non_null_fields();
    metadata.insert("entity_type".to_string(), Value::from(data_type.as_str()));
    metadata.insert("entity_id".to_string(), Value::from(record.id));
    metadata
}
