//! Metric sampler — turns raw usage into per-instance metric values.
//!
//! For each configured metric the sampler asks the provider for the recent
//! window, keeps the latest sample per (instance, container), and sums the
//! containers of an instance into one instance-level value. Instances that
//! did not report are excluded and counted, never fatal. Only when nothing
//! at all reported does the cycle fail with [`MetricsError::Unavailable`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tidegrid_state::{
    InstanceState, MetricSample, MetricSpec, MetricTargetType, ResourceName, UsageSample,
    WorkloadState,
};

use crate::error::{MetricsError, MetricsResult};
use crate::provider::MetricsProvider;

/// Pulls samples for a target from a [`MetricsProvider`].
#[derive(Clone)]
pub struct MetricSampler {
    provider: Arc<dyn MetricsProvider>,
    /// Upper bound on a single provider call.
    call_timeout: Duration,
}

impl MetricSampler {
    pub fn new(provider: Arc<dyn MetricsProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
        }
    }

    /// Sample every metric of a horizontal policy.
    ///
    /// A provider error or timeout on one metric drops that metric only.
    pub async fn sample(
        &self,
        target_id: &str,
        metrics: &[MetricSpec],
        state: &WorkloadState,
        window: Duration,
        now: u64,
    ) -> MetricsResult<Vec<MetricSample>> {
        let mut samples = Vec::with_capacity(metrics.len());
        let mut reporting = 0usize;

        for spec in metrics {
            let raw = match tokio::time::timeout(
                self.call_timeout,
                self.provider.get_usage(target_id, &spec.name, window),
            )
            .await
            {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    warn!(%target_id, metric = %spec.name, error = %e, "metrics provider error");
                    continue;
                }
                Err(_) => {
                    warn!(%target_id, metric = %spec.name, "metrics provider timed out");
                    continue;
                }
            };

            let sample = build_sample(target_id, spec, state, &raw, now);
            reporting += sample.per_instance_values.len();
            debug!(
                %target_id,
                metric = %spec.name,
                reporting = sample.per_instance_values.len(),
                missing = sample.missing_instances,
                "metric sampled"
            );
            samples.push(sample);
        }

        if reporting == 0 {
            return Err(MetricsError::Unavailable {
                target_id: target_id.to_string(),
                reason: "no instance reported".to_string(),
            });
        }
        Ok(samples)
    }

    /// Raw per-container history of a resource over `lookback`.
    pub async fn history(
        &self,
        target_id: &str,
        resource: ResourceName,
        lookback: Duration,
    ) -> MetricsResult<Vec<UsageSample>> {
        let metric = resource.metric_name();
        match tokio::time::timeout(
            self.call_timeout,
            self.provider.get_usage(target_id, metric, lookback),
        )
        .await
        {
            Ok(Ok(raw)) => Ok(raw.into_iter().filter(|s| s.value.is_finite()).collect()),
            Ok(Err(e)) => Err(MetricsError::Unavailable {
                target_id: target_id.to_string(),
                reason: format!("{metric} history: {e}"),
            }),
            Err(_) => Err(MetricsError::Timeout {
                target_id: target_id.to_string(),
                metric: metric.to_string(),
            }),
        }
    }
}

/// Build one metric's per-instance values from raw provider samples.
fn build_sample(
    target_id: &str,
    spec: &MetricSpec,
    state: &WorkloadState,
    raw: &[UsageSample],
    now: u64,
) -> MetricSample {
    let usage = per_instance_usage(raw);
    let resource = ResourceName::from_metric_name(&spec.name);
    let mut values = Vec::new();
    let mut missing = 0u32;

    if state.instances.is_empty() {
        // No instance list from the controller: trust whatever reported.
        for value in usage.values() {
            if let Some(v) = convert(spec, resource, *value, None, state) {
                values.push(v);
            }
        }
    } else {
        for instance in &state.instances {
            match usage
                .get(instance.id.as_str())
                .and_then(|v| convert(spec, resource, *v, Some(instance), state))
            {
                Some(v) => values.push(v),
                None => missing += 1,
            }
        }
    }

    MetricSample {
        target_id: target_id.to_string(),
        metric_name: spec.name.clone(),
        per_instance_values: values,
        missing_instances: missing,
        timestamp: now,
    }
}

/// Latest value per container, summed per instance.
fn per_instance_usage(raw: &[UsageSample]) -> BTreeMap<&str, f64> {
    let mut latest: BTreeMap<(&str, &str), &UsageSample> = BTreeMap::new();
    for s in raw.iter().filter(|s| s.value.is_finite()) {
        let key = (s.instance_id.as_str(), s.container_name.as_str());
        match latest.get(&key) {
            Some(prev) if prev.timestamp > s.timestamp => {}
            _ => {
                latest.insert(key, s);
            }
        }
    }

    let mut per_instance: BTreeMap<&str, f64> = BTreeMap::new();
    for ((instance, _), s) in latest {
        *per_instance.entry(instance).or_insert(0.0) += s.value;
    }
    per_instance
}

/// Express a raw instance value in the unit the metric targets.
///
/// `Utilization` divides by the instance's allocation (or the declared
/// allocation if the instance is unknown). Returns `None` when the result
/// is not a finite number.
fn convert(
    spec: &MetricSpec,
    resource: Option<ResourceName>,
    value: f64,
    instance: Option<&InstanceState>,
    state: &WorkloadState,
) -> Option<f64> {
    let converted = match (spec.target_type, resource) {
        (MetricTargetType::AverageValue, _) => value,
        (MetricTargetType::Utilization, Some(resource)) => {
            let allocation: u64 = match instance {
                Some(inst) => inst.containers.iter().map(|c| c.resources.get(resource)).sum(),
                None => state.containers.iter().map(|c| c.resources.get(resource)).sum(),
            };
            value / allocation as f64 * 100.0
        }
        // Utilization of a non-resource metric has no allocation to divide by.
        (MetricTargetType::Utilization, None) => f64::NAN,
    };
    converted.is_finite().then_some(converted)
}
