//! Error summary stage
//!
//! Pure side effect: logs how many records were rejected so far and the
//! first few of them, then lets the run continue.

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

use super::{PipelineMetrics, PipelineStage, StageMetrics};
use crate::{
    config::PipelineConfig,
    state::{ProcessingState, StateUpdate, Step},
};

/// Error handler stage
#[derive(Debug)]
pub struct ErrorHandler {
    preview_limit: usize,
    metrics: StageMetrics,
}

impl ErrorHandler {
    /// Create an error handler
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            preview_limit: config.error_preview_limit,
            metrics: StageMetrics::new(Step::ErrorHandler),
        }
    }
}

#[async_trait]
impl PipelineStage for ErrorHandler {
    async fn process(&self, state: &ProcessingState) -> StateUpdate {
        let start = Instant::now();
        let errors = state.errors();

        if errors.is_empty() {
            debug!("no record errors");
        } else {
            warn!(count = errors.len(), "records rejected before transform");
            for error in errors.iter().take(self.preview_limit) {
                warn!(
                    record_id = %error.record_id,
                    stage = ?error.stage,
                    "{}",
                    error.error_message
                );
            }
            if errors.len() > self.preview_limit {
                warn!(omitted = errors.len() - self.preview_limit, "further errors omitted");
            }
        }

        self.metrics.record(errors.len(), 0, start.elapsed());
        StateUpdate::empty()
    }

    fn step(&self) -> Step {
        Step::ErrorHandler
    }

    fn metrics(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }
}
