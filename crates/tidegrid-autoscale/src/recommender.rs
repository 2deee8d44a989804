//! Vertical recommender — smoothed per-container resource recommendations.
//!
//! Each (container, resource) pair keeps a [`DecayingHistogram`] that lives
//! across ticks. Buckets grow exponentially (first bucket 10m CPU / 10 MiB,
//! each next one 5% wider) so relative precision is the same at every scale.
//! A sample's weight is `2^((t - ref) / half_life)`: newer samples count
//! more, and the reference point is moved forward (rescaling every weight)
//! before weights overflow.
//!
//! ```text
//! target      = p90
//! lower_bound = p50
//! upper_bound = max(peak * safety_factor, target)
//! ```
//!
//! All three are clamped to the container's `[min_allowed, max_allowed]`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::debug;

use tidegrid_state::{Recommendation, ResourceName, UsageSample, VerticalPolicy};

const BUCKET_GROWTH: f64 = 1.05;
/// Largest CPU value the histogram resolves (1000 cores, in millicores).
const MAX_CPU: f64 = 1_000_000.0;
/// Largest memory value the histogram resolves (1 TiB).
const MAX_MEMORY: f64 = (1u64 << 40) as f64;
/// Exponent above which the reference timestamp is moved forward.
const MAX_DECAY_EXPONENT: f64 = 100.0;
/// Weights below this fraction of the total are dropped after a rescale.
const MIN_RELATIVE_WEIGHT: f64 = 1e-12;

pub const TARGET_PERCENTILE: f64 = 0.9;
pub const LOWER_PERCENTILE: f64 = 0.5;

fn first_bucket_size(resource: ResourceName) -> f64 {
    match resource {
        ResourceName::Cpu => 10.0,
        ResourceName::Memory => 10.0 * 1024.0 * 1024.0,
    }
}

fn max_value(resource: ResourceName) -> f64 {
    match resource {
        ResourceName::Cpu => MAX_CPU,
        ResourceName::Memory => MAX_MEMORY,
    }
}

// ── Histogram ──────────────────────────────────────────────────────

/// Exponentially bucketed histogram with time-decaying sample weights.
#[derive(Debug, Clone)]
pub struct DecayingHistogram {
    first_bucket: f64,
    weights: Vec<f64>,
    total_weight: f64,
    /// Timestamp at which a sample has weight 1.
    reference: Option<u64>,
    half_life_secs: f64,
}

impl DecayingHistogram {
    pub fn new(resource: ResourceName, half_life: Duration) -> Self {
        let first_bucket = first_bucket_size(resource);
        let buckets = bucket_count(first_bucket, max_value(resource));
        Self {
            first_bucket,
            weights: vec![0.0; buckets],
            total_weight: 0.0,
            reference: None,
            half_life_secs: half_life.as_secs_f64().max(1.0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_weight <= 0.0
    }

    /// Add a sample observed at `timestamp`.
    pub fn add(&mut self, value: f64, timestamp: u64) {
        if !value.is_finite() || value < 0.0 {
            return;
        }
        let reference = *self.reference.get_or_insert(timestamp);
        let mut exponent = (timestamp as f64 - reference as f64) / self.half_life_secs;
        if exponent > MAX_DECAY_EXPONENT {
            self.shift_reference(timestamp);
            exponent = 0.0;
        }
        let weight = exponent.exp2();
        let idx = self.bucket_index(value);
        self.weights[idx] += weight;
        self.total_weight += weight;
    }

    /// Smallest bucket boundary below which at least `p` of the weight lies.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let threshold = p.clamp(0.0, 1.0) * self.total_weight;
        let mut partial = 0.0;
        for (idx, w) in self.weights.iter().enumerate() {
            partial += w;
            if partial >= threshold && *w > 0.0 {
                return Some(self.bucket_start(idx + 1));
            }
        }
        // Rounding left the threshold unreached; fall back to the last used bucket.
        let last = self.weights.iter().rposition(|w| *w > 0.0)?;
        Some(self.bucket_start(last + 1))
    }

    fn shift_reference(&mut self, new_reference: u64) {
        let old = self.reference.unwrap_or(new_reference);
        let factor = ((old as f64 - new_reference as f64) / self.half_life_secs).exp2();
        let mut total = 0.0;
        for w in &mut self.weights {
            *w *= factor;
            total += *w;
        }
        let floor = total * MIN_RELATIVE_WEIGHT;
        for w in &mut self.weights {
            if *w < floor {
                *w = 0.0;
            }
        }
        self.total_weight = self.weights.iter().sum();
        self.reference = Some(new_reference);
    }

    fn bucket_index(&self, value: f64) -> usize {
        if value < self.first_bucket {
            return 0;
        }
        let idx = ((value * (BUCKET_GROWTH - 1.0) / self.first_bucket + 1.0).ln()
            / BUCKET_GROWTH.ln())
        .floor() as usize;
        idx.min(self.weights.len() - 1)
    }

    fn bucket_start(&self, idx: usize) -> f64 {
        self.first_bucket * (BUCKET_GROWTH.powi(idx as i32) - 1.0) / (BUCKET_GROWTH - 1.0)
    }
}

fn bucket_count(first_bucket: f64, max: f64) -> usize {
    ((max * (BUCKET_GROWTH - 1.0) / first_bucket + 1.0).ln() / BUCKET_GROWTH.ln()).ceil() as usize
        + 1
}

// ── Per-container estimator ────────────────────────────────────────

#[derive(Debug, Clone)]
struct Estimator {
    histogram: DecayingHistogram,
    /// Per-batch maxima, oldest first, used for the upper bound.
    peaks: VecDeque<(u64, f64)>,
    /// Newest sample timestamp already ingested.
    last_ingested: u64,
}

impl Estimator {
    fn new(resource: ResourceName, half_life: Duration) -> Self {
        Self {
            histogram: DecayingHistogram::new(resource, half_life),
            peaks: VecDeque::new(),
            last_ingested: 0,
        }
    }

    fn peak(&self) -> Option<f64> {
        self.peaks.iter().map(|(_, v)| *v).reduce(f64::max)
    }
}

/// Keeps one estimator per (container, resource) for a single target.
#[derive(Debug, Default)]
pub struct Recommender {
    estimators: HashMap<(String, ResourceName), Estimator>,
}

impl Recommender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw history for one resource. Samples at or before the newest
    /// already-ingested timestamp of their container are skipped, so the
    /// same lookback can be passed every tick.
    pub fn ingest(&mut self, resource: ResourceName, samples: &[UsageSample], half_life: Duration) {
        let mut by_container: HashMap<&str, Vec<&UsageSample>> = HashMap::new();
        for s in samples.iter().filter(|s| s.value.is_finite() && s.value >= 0.0) {
            by_container.entry(s.container_name.as_str()).or_default().push(s);
        }

        for (container, mut batch) in by_container {
            let estimator = self
                .estimators
                .entry((container.to_string(), resource))
                .or_insert_with(|| Estimator::new(resource, half_life));

            batch.retain(|s| s.timestamp > estimator.last_ingested);
            if batch.is_empty() {
                continue;
            }
            batch.sort_by_key(|s| s.timestamp);

            let mut peak = 0.0f64;
            let mut newest = estimator.last_ingested;
            for s in &batch {
                estimator.histogram.add(s.value, s.timestamp);
                peak = peak.max(s.value);
                newest = newest.max(s.timestamp);
            }
            estimator.peaks.push_back((newest, peak));
            estimator.last_ingested = newest;
            debug!(%container, %resource, samples = batch.len(), peak, "usage ingested");
        }
    }

    /// Recommendations for the given containers. Containers without data
    /// get none.
    pub fn recommend(
        &mut self,
        containers: &[String],
        policy: &VerticalPolicy,
        lookback: Duration,
        now: u64,
    ) -> Vec<Recommendation> {
        let cutoff = now.saturating_sub(lookback.as_secs());
        let mut out = Vec::new();

        for container in containers {
            let (min_allowed, max_allowed) = policy.bounds_for(container);
            for resource in ResourceName::ALL {
                let Some(estimator) = self.estimators.get_mut(&(container.clone(), resource)) else {
                    continue;
                };
                while estimator.peaks.front().is_some_and(|(ts, _)| *ts < cutoff) {
                    estimator.peaks.pop_front();
                }
                let (Some(target), Some(lower)) = (
                    estimator.histogram.percentile(TARGET_PERCENTILE),
                    estimator.histogram.percentile(LOWER_PERCENTILE),
                ) else {
                    continue;
                };
                let upper = estimator
                    .peak()
                    .map_or(target, |peak| (peak * policy.safety_factor).max(target));

                let (min, max) = (min_allowed.get(resource), max_allowed.get(resource));
                let clamp = |v: f64| to_units(v).clamp(min, max);
                out.push(Recommendation {
                    container_name: container.clone(),
                    resource,
                    lower_bound: clamp(lower),
                    target: clamp(target),
                    upper_bound: clamp(upper),
                });
            }
        }
        out
    }

    /// Drop estimators of containers no longer in the workload.
    pub fn retain_containers(&mut self, containers: &[String]) {
        self.estimators
            .retain(|(name, _), _| containers.iter().any(|c| c == name));
    }
}

fn to_units(value: f64) -> u64 {
    // `as` saturates, so huge or negative values stay in range.
    value.ceil() as u64
}
