//! Pipeline Processing Module
//!
//! Per-batch ingestion graph:
//!
//! ```text
//! Validate -> ErrorHandler -> Transform -> Save -+-> Finalize
//!                                          ^     |
//!                                          |     v (save failed)
//!                                          +- Retry --(exhausted)--> Finalize
//! ```
//!
//! Every stage reads the current [`ProcessingState`] and returns a
//! [`StateUpdate`]; the driver merges it and picks the next step.

pub mod error_handler;
pub mod finalize;
pub mod format;
pub mod persistence;
pub mod retry;
pub mod transformation;
pub mod validation;

pub use error_handler::ErrorHandler;
pub use finalize::Finalizer;
pub use format::{DocumentFormatter, SummaryFormatter};
pub use persistence::Persister;
pub use retry::{RetryCoordinator, RetryState};
pub use transformation::Transformer;
pub use validation::Validator;

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::{
    config::PipelineConfig,
    error::IngestResult,
    state::{ProcessingState, StateUpdate, Step},
    storage::{RelationalStore, VectorStore},
    types::{Batch, PipelineResult},
};

/// Pipeline stage trait
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Compute this stage's delta for the current state
    async fn process(&self, state: &ProcessingState) -> StateUpdate;

    /// Graph node this stage implements
    fn step(&self) -> Step;

    /// Get stage metrics
    fn metrics(&self) -> PipelineMetrics;
}

/// Pipeline metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineMetrics {
    /// Stage name
    pub stage_name: String,

    /// Number of items processed
    pub items_processed: u64,

    /// Number of items failed
    pub items_failed: u64,

    /// Number of times the stage ran
    pub invocations: u64,

    /// Average processing time per invocation in microseconds
    pub avg_processing_time_us: u64,

    /// Total processing time in microseconds
    pub total_processing_time_us: u64,
}

impl PipelineMetrics {
    /// Create new pipeline metrics
    #[must_use]
    pub fn new(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            items_processed: 0,
            items_failed: 0,
            invocations: 0,
            avg_processing_time_us: 0,
            total_processing_time_us: 0,
        }
    }
}

/// Shared per-stage counters; stages record into it on every run
#[derive(Debug)]
pub(crate) struct StageMetrics {
    inner: parking_lot::Mutex<PipelineMetrics>,
}

impl StageMetrics {
    pub(crate) fn new(step: Step) -> Self {
        Self {
            inner: parking_lot::Mutex::new(PipelineMetrics::new(step.as_str())),
        }
    }

    pub(crate) fn record(&self, processed: usize, failed: usize, duration: Duration) {
        let mut metrics = self.inner.lock();
        metrics.items_processed += processed as u64;
        metrics.items_failed += failed as u64;
        metrics.invocations += 1;

        let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        metrics.total_processing_time_us =
            metrics.total_processing_time_us.saturating_add(duration_us);
        metrics.avg_processing_time_us = metrics.total_processing_time_us / metrics.invocations;
    }

    pub(crate) fn snapshot(&self) -> PipelineMetrics {
        self.inner.lock().clone()
    }
}

/// Ingestion graph bound to one relational and one vector store
pub struct IngestionPipeline<'a> {
    config: PipelineConfig,
    validator: Validator,
    error_handler: ErrorHandler,
    transformer: Transformer,
    persister: Persister<'a>,
    retry: RetryCoordinator,
    finalizer: Finalizer,
}

impl<'a> IngestionPipeline<'a> {
    /// Build a pipeline over borrowed stores
    ///
    /// # Errors
    ///
    /// Returns error if the configuration fails validation.
    pub fn new(
        config: PipelineConfig,
        relational: &'a dyn RelationalStore,
        vector: &'a dyn VectorStore,
    ) -> IngestResult<Self> {
        config.validate()?;
        Ok(Self {
            validator: Validator::new(&config),
            error_handler: ErrorHandler::new(&config),
            transformer: Transformer::new(),
            persister: Persister::new(&config, relational, vector),
            retry: RetryCoordinator::new(&config),
            finalizer: Finalizer::new(),
            config,
        })
    }

    /// Replace the vector document formatter
    #[must_use]
    pub fn with_formatter(mut self, formatter: impl DocumentFormatter + 'a) -> Self {
        self.persister = self.persister.with_formatter(formatter);
        self
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one batch to completion and return the final state.
    ///
    /// Never fails: record problems end up in the state's error list and
    /// exhausted saves in `save_failed`.
    pub async fn run(&self, batch: Batch) -> ProcessingState {
        let mut state = ProcessingState::new(batch);
        let span = tracing::info_span!(
            "ingest",
            run_id = %state.run_id(),
            data_type = %state.data_type(),
            strategy = %state.decided_strategy(),
            records = state.data().len()
        );

        async {
            let started = Instant::now();
            let mut next = Some(Step::Validate);
            while let Some(step) = next {
                let stage = self.stage(step);
                debug_assert_eq!(stage.step(), step);
                let update = stage.process(&state).await;
                state.apply(step, update);
                next = Self::route(step, &state);
            }
            tracing::debug!(
                path = state.processing_path(),
                elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
                "pipeline run complete"
            );
        }
        .instrument(span)
        .await;

        state
    }

    /// Run one batch and return only its terminal result
    pub async fn run_to_result(&self, batch: Batch) -> Option<PipelineResult> {
        self.run(batch).await.into_result()
    }

    /// Metrics of every stage, in graph order
    #[must_use]
    pub fn metrics(&self) -> Vec<PipelineMetrics> {
        [
            Step::Validate,
            Step::ErrorHandler,
            Step::Transform,
            Step::Save,
            Step::Retry,
            Step::Finalize,
        ]
        .into_iter()
        .map(|step| self.stage(step).metrics())
        .collect()
    }

    fn stage(&self, step: Step) -> &dyn PipelineStage {
        match step {
            Step::Validate => &self.validator,
            Step::ErrorHandler => &self.error_handler,
            Step::Transform => &self.transformer,
            Step::Save => &self.persister,
            Step::Retry => &self.retry,
            Step::Finalize => &self.finalizer,
        }
    }

    /// Graph edges; `None` ends the run
    fn route(step: Step, state: &ProcessingState) -> Option<Step> {
        match step {
            Step::Validate => Some(Step::ErrorHandler),
            Step::ErrorHandler => Some(Step::Transform),
            Step::Transform => Some(Step::Save),
            Step::Save if state.save_failed() => Some(Step::Retry),
            Step::Save => Some(Step::Finalize),
            Step::Retry => Some(RetryCoordinator::state_after_retry(state).next_step()),
            Step::Finalize => None,
        }
    }
}

impl std::fmt::Debug for IngestionPipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
