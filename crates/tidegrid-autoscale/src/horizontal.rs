//! Horizontal decision engine — replica count from metric ratios.
//!
//! # Algorithm
//!
//! ```text
//! for each metric i:
//!     ratio_i   = average(per_instance_values) / target_value
//!     desired_i = ceil(R * ratio_i)          (R = 1 when R == 0)
//!
//! candidate = clamp(max_i desired_i, min_replicas, max_replicas)
//! ```
//!
//! Products within `1e-9` of an integer snap to it before `ceil`, so float
//! noise (`4 * 1.25000000001`) never adds a replica. A metric whose ratio is
//! not finite is skipped for the tick. With no usable metric there is no
//! candidate and the prior replica count stands.

use tracing::debug;

use tidegrid_state::{HorizontalPolicy, MetricRatio, MetricSample};

const SNAP_EPSILON: f64 = 1e-9;

/// Output of one horizontal evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizontalDecision {
    /// Clamped replica count, `None` when no metric was usable.
    pub candidate: Option<u32>,
    pub metrics: Vec<MetricRatio>,
}

/// Compute the replica candidate for a target.
pub fn desired_replicas(
    current: u32,
    policy: &HorizontalPolicy,
    samples: &[MetricSample],
) -> HorizontalDecision {
    let base = current.max(1);
    let mut metrics = Vec::with_capacity(policy.metrics.len());

    for spec in &policy.metrics {
        let Some(sample) = samples.iter().find(|s| s.metric_name == spec.name) else {
            continue;
        };
        let Some(average) = sample.average() else {
            continue;
        };
        let ratio = average / spec.target_value;
        if !ratio.is_finite() {
            debug!(metric = %spec.name, average, target = spec.target_value, "non-finite ratio, skipping metric");
            continue;
        }
        metrics.push(MetricRatio {
            name: spec.name.clone(),
            average,
            target_value: spec.target_value,
            ratio,
            desired: scaled(base, ratio),
        });
    }

    let candidate = metrics
        .iter()
        .map(|m| m.desired)
        .max()
        .map(|d| clamp(d, policy));

    HorizontalDecision { candidate, metrics }
}

/// Keep a replica count within the policy bounds.
pub fn clamp(replicas: u32, policy: &HorizontalPolicy) -> u32 {
    replicas.max(policy.min_replicas).min(policy.max_replicas)
}

/// `ceil(base * ratio)` with near-integer snapping.
fn scaled(base: u32, ratio: f64) -> u32 {
    let product = base as f64 * ratio;
    let rounded = product.round();
    let product = if (product - rounded).abs() < SNAP_EPSILON {
        rounded
    } else {
        product
    };
    // `as` saturates for out-of-range floats.
    product.ceil().max(0.0) as u32
}
