//! tidegrid-metrics — usage data in, per-tick samples out.
//!
//! Defines the [`MetricsProvider`] seam the autoscaler reads usage through,
//! an in-memory provider fed by the REST API, the [`MetricSampler`] that
//! turns raw samples into per-instance metric values, and the Prometheus
//! rendering of decision events.
//!
//! # Architecture
//!
//! ```text
//! InMemoryUsageProvider
//!   ├── record() ← samples pushed by agents / the API
//!   └── get_usage() → MetricsProvider impl
//!
//! MetricSampler
//!   ├── sample()  → Vec<MetricSample> (horizontal engine input)
//!   └── history() → Vec<UsageSample> (vertical recommender input)
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod error;
pub mod prometheus;
pub mod provider;
pub mod sampler;

pub use error::{MetricsError, MetricsResult};
pub use prometheus::render_prometheus;
pub use provider::{InMemoryUsageProvider, MetricsProvider, UsageFuture};
pub use sampler::MetricSampler;
