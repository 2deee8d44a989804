//! Metric sampling errors.

use thiserror::Error;

/// Result type alias for sampling operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors that can occur while sampling a target.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// No instance reported any usable value.
    #[error("metrics unavailable for {target_id}: {reason}")]
    Unavailable { target_id: String, reason: String },

    #[error("metrics provider timed out for {target_id} ({metric})")]
    Timeout { target_id: String, metric: String },
}
