//! Metrics providers: where usage samples come from.
//!
//! The autoscaler only ever talks to the [`MetricsProvider`] trait. The
//! [`InMemoryUsageProvider`] is the standalone implementation: agents push
//! samples into it (through the REST API) and the sampler reads them back.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::debug;

use tidegrid_state::UsageSample;

/// Boxed future alias for provider reads.
pub type UsageFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<Vec<UsageSample>>> + Send + 'a>>;

/// Source of per-instance, per-container usage samples.
///
/// Implementations may return partial results: instances that did not
/// report are simply absent from the returned list.
pub trait MetricsProvider: Send + Sync {
    /// Samples of `metric` for `target_id` no older than `window`.
    fn get_usage<'a>(
        &'a self,
        target_id: &'a str,
        metric: &'a str,
        window: Duration,
    ) -> UsageFuture<'a>;
}

/// Series key: (target_id, metric).
type SeriesKey = (String, String);

/// In-memory usage store with time-based retention.
#[derive(Clone)]
pub struct InMemoryUsageProvider {
    series: Arc<RwLock<HashMap<SeriesKey, VecDeque<UsageSample>>>>,
    retention: Duration,
}

impl InMemoryUsageProvider {
    /// Create a provider that keeps samples for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            series: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Record one sample for a target metric.
    pub async fn record(&self, target_id: &str, metric: &str, sample: UsageSample) {
        self.record_batch(target_id, metric, vec![sample]).await;
    }

    /// Record several samples for a target metric, pruning expired ones.
    pub async fn record_batch(&self, target_id: &str, metric: &str, samples: Vec<UsageSample>) {
        let cutoff = epoch_secs().saturating_sub(self.retention.as_secs());
        let mut series = self.series.write().await;
        let entry = series
            .entry((target_id.to_string(), metric.to_string()))
            .or_default();
        let count = samples.len();
        for sample in samples {
            // Keep each series ordered by timestamp.
            let pos = entry
                .iter()
                .rposition(|s| s.timestamp <= sample.timestamp)
                .map_or(0, |p| p + 1);
            entry.insert(pos, sample);
        }
        while entry.front().is_some_and(|s| s.timestamp < cutoff) {
            entry.pop_front();
        }
        debug!(%target_id, %metric, count, "usage samples recorded");
    }

    /// Drop every series for a target.
    pub async fn unregister(&self, target_id: &str) {
        let mut series = self.series.write().await;
        series.retain(|(t, _), _| t != target_id);
        debug!(%target_id, "usage series dropped");
    }

    /// Number of retained samples for a target metric.
    pub async fn sample_count(&self, target_id: &str, metric: &str) -> usize {
        let series = self.series.read().await;
        series
            .get(&(target_id.to_string(), metric.to_string()))
            .map_or(0, VecDeque::len)
    }

    /// Latest value per (instance, container) for a target metric.
    pub async fn latest(&self, target_id: &str, metric: &str) -> HashMap<(String, String), f64> {
        let series = self.series.read().await;
        let mut latest = HashMap::new();
        if let Some(samples) = series.get(&(target_id.to_string(), metric.to_string())) {
            // Ordered by timestamp, so later inserts win.
            for s in samples {
                latest.insert((s.instance_id.clone(), s.container_name.clone()), s.value);
            }
        }
        latest
    }
}

impl MetricsProvider for InMemoryUsageProvider {
    fn get_usage<'a>(
        &'a self,
        target_id: &'a str,
        metric: &'a str,
        window: Duration,
    ) -> UsageFuture<'a> {
        Box::pin(async move {
            let since = epoch_secs().saturating_sub(window.as_secs());
            let series = self.series.read().await;
            let samples = series
                .get(&(target_id.to_string(), metric.to_string()))
                .map(|samples| {
                    samples
                        .iter()
                        .filter(|s| s.timestamp >= since)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(samples)
        })
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(instance: &str, value: f64, timestamp: u64) -> UsageSample {
        UsageSample {
            instance_id: instance.to_string(),
            container_name: "app".to_string(),
            value,
            timestamp,
        }
    }

    #[tokio::test]
    async fn record_and_read_back() {
        let provider = InMemoryUsageProvider::new(Duration::from_secs(3600));
        let now = epoch_secs();

        provider.record("t", "cpu", sample("i-0", 100.0, now)).await;
        provider.record("t", "cpu", sample("i-1", 200.0, now)).await;

        let usage = provider
            .get_usage("t", "cpu", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!(provider.sample_count("t", "cpu").await, 2);
    }

    #[tokio::test]
    async fn window_excludes_old_samples() {
        let provider = InMemoryUsageProvider::new(Duration::from_secs(3600));
        let now = epoch_secs();

        provider.record("t", "cpu", sample("i-0", 100.0, now - 600)).await;
        provider.record("t", "cpu", sample("i-0", 150.0, now)).await;

        let usage = provider
            .get_usage("t", "cpu", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].value, 150.0);
    }

    #[tokio::test]
    async fn retention_prunes_expired_samples() {
        let provider = InMemoryUsageProvider::new(Duration::from_secs(60));
        let now = epoch_secs();

        provider
            .record_batch(
                "t",
                "memory",
                vec![sample("i-0", 1.0, now - 3600), sample("i-0", 2.0, now)],
            )
            .await;

        assert_eq!(provider.sample_count("t", "memory").await, 1);
    }

    #[tokio::test]
    async fn out_of_order_samples_stay_sorted() {
        let provider = InMemoryUsageProvider::new(Duration::from_secs(3600));
        let now = epoch_secs();

        provider.record("t", "cpu", sample("i-0", 2.0, now)).await;
        provider.record("t", "cpu", sample("i-0", 1.0, now - 10)).await;

        let latest = provider.latest("t", "cpu").await;
        assert_eq!(latest[&("i-0".to_string(), "app".to_string())], 2.0);
    }

    #[tokio::test]
    async fn unknown_series_is_empty() {
        let provider = InMemoryUsageProvider::new(Duration::from_secs(60));
        let usage = provider
            .get_usage("nope", "cpu", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(usage.is_empty());
    }

    #[tokio::test]
    async fn unregister_drops_all_metrics_of_target() {
        let provider = InMemoryUsageProvider::new(Duration::from_secs(3600));
        let now = epoch_secs();
        provider.record("a", "cpu", sample("i-0", 1.0, now)).await;
        provider.record("a", "memory", sample("i-0", 1.0, now)).await;
        provider.record("b", "cpu", sample("i-0", 1.0, now)).await;

        provider.unregister("a").await;

        assert_eq!(provider.sample_count("a", "cpu").await, 0);
        assert_eq!(provider.sample_count("a", "memory").await, 0);
        assert_eq!(provider.sample_count("b", "cpu").await, 1);
    }
}
