//! Matchday Ingest Error System
//!
//! Errors raised by stores, configuration and individual records.
//! Record-level errors never escape a pipeline run; they are folded into
//! the run's error list instead.

use thiserror::Error;

/// Result type for all ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Main error type for ingestion operations
#[derive(Error, Debug)]
pub enum IngestError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Record failed schema validation
    #[error("Validation failed for field '{field}': {reason}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Reason for validation failure
        reason: String,
    },

    /// Record could not be coerced into its canonical shape
    #[error("Transform failed for field '{field}': {reason}")]
    Transform {
        /// Field that failed coercion
        field: String,
        /// Reason for the failure
        reason: String,
    },

    /// Record could not be rendered into a vector document
    #[error("Format failed for {entity}: {reason}")]
    Format {
        /// Entity type being rendered
        entity: String,
        /// Reason for the failure
        reason: String,
    },

    /// Relational or vector store operation errors
    #[error("Store operation failed: {operation} - {reason}")]
    Store {
        /// Operation that failed
        operation: String,
        /// Reason for failure
        reason: String,
    },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `PostgreSQL` errors
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool errors
    #[cfg(feature = "postgres")]
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

impl IngestError {
    /// Create configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create transform error
    pub fn transform(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transform {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create format error
    pub fn format(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Format {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Create store error
    pub fn store(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Message suitable for a record-level error entry.
    ///
    /// Record errors carry only the reason; the field name is already part
    /// of the reason text produced by the validator and transformer.
    #[must_use]
    pub fn record_message(&self) -> String {
        match self {
            Self::Validation { reason, .. }
            | Self::Transform { reason, .. }
            | Self::Format { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Whether repeating the failed store call may succeed.
    ///
    /// The persister ends a save attempt (and lets the retry loop run) only
    /// for retryable errors.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration { .. } => false,
            Self::Validation { .. } => false,
            Self::Transform { .. } => false,
            Self::Format { .. } => false,
            Self::Store { .. } => true,
            Self::Serialization(_) => false,
            Self::Io(_) => true,
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => true,
            #[cfg(feature = "postgres")]
            Self::Pool(_) => true,
        }
    }
}
