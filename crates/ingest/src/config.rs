//! Matchday Ingest Configuration
//!
//! Pipeline tuning knobs with `garde` validation. Values come from
//! defaults, an optional TOML document and `MATCHDAY_*` environment
//! overrides, in that order.

use garde::Validate;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::error::{IngestError, IngestResult};

/// Default bound on save attempts per run
pub const MAX_RETRY_COUNT: u32 = 3;

/// Default number of record errors shown in detail in summary logs
pub const DEFAULT_ERROR_PREVIEW_LIMIT: usize = 10;

/// Default number of documents per vector store call
pub const DEFAULT_VECTOR_BATCH_SIZE: usize = 64;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// Save attempts before the run is marked as exhausted
    #[garde(range(min = 1, max = 10))]
    pub max_retry_count: u32,

    /// Rejections logged in detail by the validator and error handler
    #[garde(range(min = 1, max = 1000))]
    pub error_preview_limit: usize,

    /// Documents sent per `add_documents` call
    #[garde(range(min = 1, max = 10_000))]
    pub vector_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retry_count: MAX_RETRY_COUNT,
            error_preview_limit: DEFAULT_ERROR_PREVIEW_LIMIT,
            vector_batch_size: DEFAULT_VECTOR_BATCH_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Parse configuration from a TOML document. Missing keys keep defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails validation.
    pub fn from_toml_str(source: &str) -> IngestResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| IngestError::configuration(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> IngestResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Defaults with environment overrides applied
    ///
    /// # Errors
    ///
    /// Returns error if an override is not a number or fails validation.
    pub fn from_env() -> IngestResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `MATCHDAY_*` environment overrides on top of this configuration
    ///
    /// # Errors
    ///
    /// Returns error if an override is not a number or fails validation.
    pub fn with_env_overrides(mut self) -> IngestResult<Self> {
        if let Some(value) = env_number("MATCHDAY_MAX_RETRY_COUNT")? {
            self.max_retry_count = value;
        }
        if let Some(value) = env_number("MATCHDAY_ERROR_PREVIEW_LIMIT")? {
            self.error_preview_limit = value;
        }
        if let Some(value) = env_number("MATCHDAY_VECTOR_BATCH_SIZE")? {
            self.vector_batch_size = value;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration validation fails.
    pub fn validate(&self) -> IngestResult<()> {
        garde::Validate::validate(self, &())
            .map_err(|e| IngestError::configuration(format!("Validation failed: {e}")))
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> IngestResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| IngestError::configuration(format!("{key} must be a number, got '{raw}'"))),
        Err(_) => Ok(None),
    }
}
