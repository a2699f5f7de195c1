//! Save retry coordination
//!
//! Counts failed save attempts. While the count stays below the
//! configured maximum the failure flag is cleared and the graph loops back
//! to Save; once it reaches the maximum the flag stays set and the run
//! moves on to Finalize.

use async_trait::async_trait;
use std::time::Instant;
use tracing::{error, warn};

use super::{PipelineMetrics, PipelineStage, StageMetrics};
use crate::{
    config::PipelineConfig,
    state::{ProcessingState, StateUpdate, Step},
};

/// Save lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Save attempt in progress
    Persisting,
    /// Last attempt failed and another one is allowed
    RetryPending,
    /// No attempts left
    RetryExhausted,
}

impl RetryState {
    /// Graph step taken from this state
    #[must_use]
    pub const fn next_step(self) -> Step {
        match self {
            Self::Persisting | Self::RetryPending => Step::Save,
            Self::RetryExhausted => Step::Finalize,
        }
    }
}

/// Retry stage
#[derive(Debug)]
pub struct RetryCoordinator {
    max_retry_count: u32,
    metrics: StageMetrics,
}

impl RetryCoordinator {
    /// Create a coordinator
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_retry_count: config.max_retry_count,
            metrics: StageMetrics::new(Step::Retry),
        }
    }

    /// Count one more failed attempt and decide what comes next
    #[must_use]
    pub const fn transition(&self, retry_count: u32) -> (u32, RetryState) {
        let next = retry_count.saturating_add(1);
        if next < self.max_retry_count {
            (next, RetryState::RetryPending)
        } else {
            (next, RetryState::RetryExhausted)
        }
    }

    /// Lifecycle state right after this stage ran
    #[must_use]
    pub const fn state_after_retry(state: &ProcessingState) -> RetryState {
        if state.save_failed() {
            RetryState::RetryExhausted
        } else {
            RetryState::RetryPending
        }
    }
}

#[async_trait]
impl PipelineStage for RetryCoordinator {
    async fn process(&self, state: &ProcessingState) -> StateUpdate {
        let start = Instant::now();
        let (count, next) = self.transition(state.save_retry_count());

        match next {
            RetryState::RetryExhausted => error!(
                attempts = count,
                max = self.max_retry_count,
                saved = state.saved_count(),
                "save retries exhausted"
            ),
            _ => warn!(
                attempt = count,
                max = self.max_retry_count,
                "save failed, retrying"
            ),
        }

        self.metrics.record(1, 0, start.elapsed());
        StateUpdate {
            save_retry_count: Some(count),
            save_failed: Some(next == RetryState::RetryExhausted),
            ..StateUpdate::default()
        }
    }

    fn step(&self) -> Step {
        Step::Retry
    }

    fn metrics(&self) -> PipelineMetrics {
        self.metrics.snapshot()
    }
}
