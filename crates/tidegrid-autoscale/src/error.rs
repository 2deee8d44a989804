//! Autoscaler errors.

use thiserror::Error;

use tidegrid_metrics::MetricsError;
use tidegrid_state::StateError;

/// Result type alias for autoscaler operations.
pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

/// Errors that end a tick (or, for `ConfigInvalid`, park the target).
///
/// None of these escape a target's loop.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    /// No instance reported any sample; the prior desired state is kept.
    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),

    /// The target's policy cannot be evaluated until an operator fixes it.
    #[error("invalid config for {target_id}: {reason}")]
    ConfigInvalid { target_id: String, reason: String },

    /// A workload controller call errored or timed out.
    #[error("actuation failed ({operation}): {reason}")]
    ActuationFailed { operation: String, reason: String },

    /// Current workload state could not be read.
    #[error("workload state unavailable: {0}")]
    Workload(String),

    #[error("state store: {0}")]
    State(#[from] StateError),
}

impl From<MetricsError> for AutoscaleError {
    fn from(e: MetricsError) -> Self {
        AutoscaleError::MetricsUnavailable(e.to_string())
    }
}

impl AutoscaleError {
    pub(crate) fn invalid(target_id: &str, reason: impl Into<String>) -> Self {
        AutoscaleError::ConfigInvalid {
            target_id: target_id.to_string(),
            reason: reason.into(),
        }
    }
}
