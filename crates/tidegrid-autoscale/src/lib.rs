//! tidegrid-autoscale — the autoscaling control loop.
//!
//! Every tick, per target: read the workload's live state, sample its
//! metrics, compute a replica candidate and per-container resource
//! recommendations, stabilize both against recent history, decide how the
//! vertical change may be applied, vet the pair for conflicts, then issue
//! the minimal set of controller calls and emit one [`DecisionEvent`].
//!
//! # Layout
//!
//! ```text
//! Supervisor ── one task per target ──► Reconciler::tick
//!                                         ├── horizontal::desired_replicas
//!                                         ├── Recommender (decaying histograms)
//!                                         ├── StabilizationTracker
//!                                         ├── policy::evaluate
//!                                         ├── ConflictGuard
//!                                         └── Actuator ──► WorkloadController
//! ```
//!
//! The decision functions are pure; all I/O goes through the
//! [`WorkloadController`], [`ConfigSource`], [`DecisionSink`] and
//! [`tidegrid_metrics::MetricsProvider`] seams.
//!
//! [`DecisionEvent`]: tidegrid_state::DecisionEvent

pub mod actuator;
pub mod conflict;
pub mod controller;
pub mod error;
pub mod horizontal;
pub mod policy;
pub mod reconciler;
pub mod recommender;
pub mod stabilization;
pub mod supervisor;
pub mod validate;

pub use actuator::Actuator;
pub use conflict::ConflictGuard;
pub use controller::{
    BoxFuture, ConfigSource, DecisionSink, FanoutSink, TracingSink, WorkloadController,
};
pub use error::{AutoscaleError, AutoscaleResult};
pub use horizontal::{desired_replicas, HorizontalDecision};
pub use policy::{evaluate, PolicyInput, VerticalAction};
pub use reconciler::{Reconciler, ReconcilerSettings};
pub use recommender::{DecayingHistogram, Recommender};
pub use stabilization::StabilizationTracker;
pub use supervisor::{ConfigBackoff, Supervisor, SupervisorConfig};
pub use validate::{validate, ValidatedConfig};
