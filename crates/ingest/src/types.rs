//! Matchday Ingest Types
//!
//! Records, identifiers and results exchanged between pipeline stages,
//! stores and callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IngestError;

/// Raw input record: field name to JSON scalar
pub type Record = serde_json::Map<String, Value>;

/// Known soccer entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Squad member
    Player,
    /// Club
    Team,
    /// Venue
    Stadium,
    /// Fixture between two teams
    Schedule,
}

impl EntityKind {
    /// All entity kinds, in foreign-key dependency order
    pub const ALL: [Self; 4] = [Self::Stadium, Self::Team, Self::Player, Self::Schedule];

    /// Lowercase name, also used as the relational table name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Team => "team",
            Self::Stadium => "stadium",
            Self::Schedule => "schedule",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "player" => Ok(Self::Player),
            "team" => Ok(Self::Team),
            "stadium" => Ok(Self::Stadium),
            "schedule" => Ok(Self::Schedule),
            other => Err(IngestError::validation(
                "data_type",
                format!("unknown entity type '{other}'"),
            )),
        }
    }
}

/// Batch data type: a known entity or an arbitrary label.
///
/// Unknown labels are accepted and validated against the fallback schema
/// (only `id` required).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    /// One of the registry entities
    Entity(EntityKind),
    /// Any other label
    Other(String),
}

impl DataType {
    /// Parse a data type label; never fails
    #[must_use]
    pub fn parse(label: &str) -> Self {
        label
            .parse::<EntityKind>()
            .map_or_else(|_| Self::Other(label.trim().to_string()), Self::Entity)
    }

    /// Entity kind, if known
    #[must_use]
    pub const fn entity(&self) -> Option<EntityKind> {
        match self {
            Self::Entity(kind) => Some(*kind),
            Self::Other(_) => None,
        }
    }

    /// Label as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Entity(kind) => kind.as_str(),
            Self::Other(label) => label,
        }
    }
}

impl From<EntityKind> for DataType {
    fn from(kind: EntityKind) -> Self {
        Self::Entity(kind)
    }
}

impl From<String> for DataType {
    fn from(label: String) -> Self {
        Self::parse(&label)
    }
}

impl From<&str> for DataType {
    fn from(label: &str) -> Self {
        Self::parse(label)
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence strategy decided upstream, once per batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Schema-driven insert into the relational store
    Rule,
    /// Content-driven upsert into the vector store
    Policy,
}

impl Strategy {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Policy => "policy",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rule" => Ok(Self::Rule),
            "policy" => Ok(Self::Policy),
            other => Err(IngestError::validation(
                "decided_strategy",
                format!("unknown strategy '{other}', expected 'rule' or 'policy'"),
            )),
        }
    }
}

/// Identifier of a raw record as it appeared in the input
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Integer id
    Int(i64),
    /// String id, or any other non-null value rendered as text
    Text(String),
    /// Absent or null id
    Missing,
}

impl RecordId {
    /// Extract the id of a raw record
    #[must_use]
    pub fn of(record: &Record) -> Self {
        match record.get("id") {
            None | Some(Value::Null) => Self::Missing,
            Some(Value::Number(n)) => n
                .as_i64()
                .map_or_else(|| Self::Text(n.to_string()), Self::Int),
            Some(Value::String(s)) => Self::Text(s.clone()),
            Some(other) => Self::Text(other.to_string()),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
            Self::Missing => f.write_str("<missing>"),
        }
    }
}

/// Pipeline stage that produced a record error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    /// Required field / id type check
    Validate,
    /// Canonical coercion
    Transform,
    /// Vector document rendering
    Format,
}

/// One entry of the run's append-only error list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Id of the offending record
    pub record_id: RecordId,
    /// Human-readable reason
    pub error_message: String,
    /// Stage that rejected the record
    pub stage: ErrorStage,
}

impl RecordError {
    /// Create a record error
    pub fn new(record_id: RecordId, stage: ErrorStage, error_message: impl Into<String>) -> Self {
        Self {
            record_id,
            error_message: error_message.into(),
            stage,
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.record_id, self.error_message)
    }
}

/// Canonical field value after coercion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integer column
    Integer(i64),
    /// Text column (trimmed)
    Text(String),
    /// Absent optional value
    Null,
}

impl FieldValue {
    /// Whether this is `Null`
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer value, if any
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value, if any
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to a JSON value
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer(v) => Value::from(*v),
            Self::Text(v) => Value::from(v.clone()),
            Self::Null => Value::Null,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Null => Ok(()),
        }
    }
}

/// Record coerced to its destination schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    /// Coerced primary key
    pub id: i64,
    /// All fields (including `id`) in schema order
    pub fields: Vec<(String, FieldValue)>,
}

impl CanonicalRecord {
    /// Look up a field value by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Non-null fields as a JSON map
    #[must_use]
    pub fn non_null_fields(&self) -> Record {
        self.fields
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    /// All fields as a JSON map
    #[must_use]
    pub fn to_record(&self) -> Record {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

/// Vector store document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Natural-language description used for embedding
    pub text: String,
    /// Null-free metadata keyed by entity id and type
    pub metadata: Record,
}

impl Document {
    /// Entity id stored in the metadata
    #[must_use]
    pub fn entity_id(&self) -> Option<i64> {
        self.metadata.get("entity_id").and_then(Value::as_i64)
    }
}

/// One batch submitted to the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Raw records
    pub data: Vec<Record>,
    /// Entity type of every record in the batch
    pub data_type: DataType,
    /// Sink chosen upstream
    pub decided_strategy: Strategy,
}

impl Batch {
    /// Create a batch
    pub fn new(data: Vec<Record>, data_type: impl Into<DataType>, strategy: Strategy) -> Self {
        Self {
            data,
            data_type: data_type.into(),
            decided_strategy: strategy,
        }
    }
}

/// How the save step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    /// No record survived validation, transformation and formatting
    NothingToSave,
    /// First save attempt succeeded
    Saved,
    /// A later attempt succeeded after at least one failure
    SavedAfterRetry,
    /// Every attempt failed
    RetryExhausted,
}

/// Terminal aggregate of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Invocation id, also attached to log spans
    pub run_id: Uuid,
    /// Batch data type
    pub data_type: DataType,
    /// Sink used
    pub strategy: Strategy,
    /// Records written
    pub processed: u64,
    /// Records written to the relational store
    pub db: u64,
    /// Records written to the vector store
    pub vector: u64,
    /// Records in the input batch
    pub total: u64,
    /// Every record error of the run
    pub errors: Vec<RecordError>,
    /// Save outcome
    pub status: SaveStatus,
    /// Retries consumed
    pub retries: u32,
    /// Executed steps
    pub processing_path: String,
    /// Invocation start
    pub started_at: DateTime<Utc>,
    /// Finalizer time
    pub finished_at: DateTime<Utc>,
}
