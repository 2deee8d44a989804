//! Per-target reconciler — one tick of the control loop.
//!
//! ```text
//! current_state ─► sample ─► horizontal candidate ─┐
//!              └─► history ─► recommendations ─────┤
//!                                                  ▼
//!                       record ─► stabilize ─► policy ─► conflict guard
//!                                                  │
//!                                                  ▼
//!                                   actuate ─► DecisionEvent
//! ```
//!
//! All I/O happens at the edges (`current_state`, sampling, actuation). The
//! reconciler owns the target's loop state: the stabilization stream, the
//! recommender's estimators, and the conflict guard's memory. Dropping it
//! drops all of that.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tidegrid_metrics::MetricSampler;
use tidegrid_state::{
    Actuation, ContainerResources, DecisionEvent, DecisionRecord, HorizontalOutcome,
    Recommendation, ResourceName, TargetId, UpdateMode, VerticalActionKind, VerticalOutcome,
    WorkloadState,
};

use crate::actuator::Actuator;
use crate::conflict::ConflictGuard;
use crate::controller::WorkloadController;
use crate::error::{AutoscaleError, AutoscaleResult};
use crate::horizontal;
use crate::policy::{self, PolicyInput};
use crate::recommender::Recommender;
use crate::stabilization::StabilizationTracker;
use crate::validate::ValidatedConfig;

/// Timing knobs shared by every target.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    /// Upper bound on any single controller or provider call.
    pub call_timeout: Duration,
    /// How far back the sampler looks for current horizontal metrics.
    pub metric_window: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            metric_window: Duration::from_secs(60),
        }
    }
}

pub struct Reconciler {
    target_id: TargetId,
    controller: Arc<dyn WorkloadController>,
    sampler: MetricSampler,
    actuator: Actuator,
    settings: ReconcilerSettings,
    tracker: StabilizationTracker,
    recommender: Recommender,
    guard: ConflictGuard,
    /// Containers that have had a recommendation on an earlier tick.
    initialized: HashSet<String>,
}

impl Reconciler {
    pub fn new(
        target_id: &str,
        controller: Arc<dyn WorkloadController>,
        sampler: MetricSampler,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            target_id: target_id.to_string(),
            actuator: Actuator::new(controller.clone(), settings.call_timeout),
            controller,
            sampler,
            settings,
            tracker: StabilizationTracker::new(crate::validate::DEFAULT_STABILIZATION_WINDOW),
            recommender: Recommender::new(),
            guard: ConflictGuard::new(),
            initialized: HashSet::new(),
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Run one tick. Always yields an event; a tick that ended early carries
    /// the reason in `error` and issued no mutation past that point.
    pub async fn tick(&mut self, validated: &ValidatedConfig, now: u64) -> DecisionEvent {
        let mut event = DecisionEvent::empty(&self.target_id, now);
        if let Err(e) = self.run(validated, now, &mut event).await {
            match &e {
                AutoscaleError::MetricsUnavailable(_) => {
                    debug!(target_id = %self.target_id, error = %e, "tick skipped")
                }
                _ => warn!(target_id = %self.target_id, error = %e, "tick failed"),
            }
            event.error = Some(e.to_string());
        }
        event
    }

    async fn run(
        &mut self,
        validated: &ValidatedConfig,
        now: u64,
        event: &mut DecisionEvent,
    ) -> AutoscaleResult<()> {
        let config = &validated.config;
        let id = self.target_id.clone();
        self.tracker.set_window(validated.stabilization_window);

        let state = self.current_state().await?;
        event.current_replicas = Some(state.replicas);

        // ── Decide ─────────────────────────────────────────────────
        let mut candidate = None;
        if let Some(policy) = &config.horizontal {
            let samples = self
                .sampler
                .sample(&id, &policy.metrics, &state, self.settings.metric_window, now)
                .await?;
            let decision = horizontal::desired_replicas(state.replicas, policy, &samples);
            event.metrics = decision.metrics;
            candidate = decision.candidate;
        }

        let mut desired_resources = None;
        if let Some(policy) = &config.vertical {
            for resource in ResourceName::ALL {
                match self.sampler.history(&id, resource, validated.lookback).await {
                    Ok(history) => self.recommender.ingest(resource, &history, validated.half_life),
                    Err(e) => warn!(target_id = %id, %resource, error = %e, "usage history unavailable"),
                }
            }
            let names: Vec<String> = state.containers.iter().map(|c| c.name.clone()).collect();
            self.recommender.retain_containers(&names);
            self.initialized.retain(|c| names.contains(c));
            event.recommendations =
                self.recommender
                    .recommend(&names, policy, validated.lookback, now);
            desired_resources = Some(apply_targets(&state, &event.recommendations));
        }

        self.tracker.record(DecisionRecord {
            target_id: id.clone(),
            timestamp: now,
            desired_replicas: candidate,
            desired_resources: desired_resources.clone(),
        });

        // ── Stabilize & plan ───────────────────────────────────────
        let stabilized = match (&config.horizontal, candidate) {
            (Some(policy), Some(candidate)) => Some((
                policy,
                candidate,
                self.tracker.stabilize_replicas(state.replicas, candidate, now),
            )),
            _ => None,
        };
        let replicas_change = stabilized.is_some_and(|(_, _, s)| s != state.replicas);

        let mut actions = Vec::new();
        if let (Some(policy), Some(desired)) = (&config.vertical, &desired_resources) {
            let target_shape = self.tracker.stabilize_resources(&state, desired, policy, now);
            event.desired_resources = target_shape.clone();
            actions = policy::evaluate(
                policy.update_mode,
                &PolicyInput {
                    config,
                    state: &state,
                    desired: &target_shape,
                    initialized: &self.initialized,
                    tolerance_percent: policy.min_change_percent,
                },
            );
        }

        event.conflict = self.guard.check(config, replicas_change);

        // ── Actuate ────────────────────────────────────────────────
        match stabilized {
            Some((policy, candidate, stabilized)) => {
                let actuation = self
                    .actuator
                    .scale(&id, state.replicas, stabilized, policy)
                    .await;
                self.guard.record_horizontal(actuation == Actuation::Applied);
                event.horizontal = Some(HorizontalOutcome {
                    candidate,
                    stabilized,
                    actuation,
                });
            }
            None => self.guard.record_horizontal(false),
        }

        let mode = config.vertical.as_ref().map(|v| v.update_mode);
        for action in actions {
            let actuation =
                if event.conflict.vertical_suppressed && action.kind != VerticalActionKind::Observe {
                    Actuation::Suppressed {
                        reason: "replica count changing".to_string(),
                    }
                } else {
                    self.actuator.apply(&id, &action, &state).await
                };
            if mode == Some(UpdateMode::Initial)
                && matches!(
                    actuation,
                    Actuation::Applied | Actuation::Observed | Actuation::NoOp
                )
            {
                self.initialized.insert(action.container_name.clone());
            }
            event.vertical.push(VerticalOutcome {
                container_name: action.container_name,
                kind: action.kind,
                instance_id: action.instance_id,
                resources: action.resources,
                actuation,
            });
        }
        if mode.is_some_and(|m| m != UpdateMode::Initial) {
            self.initialized
                .extend(event.recommendations.iter().map(|r| r.container_name.clone()));
        }

        Ok(())
    }

    async fn current_state(&self) -> AutoscaleResult<WorkloadState> {
        match tokio::time::timeout(
            self.settings.call_timeout,
            self.controller.current_state(&self.target_id),
        )
        .await
        {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(e)) => Err(AutoscaleError::Workload(e.to_string())),
            Err(_) => Err(AutoscaleError::Workload(format!(
                "timed out after {:?}",
                self.settings.call_timeout
            ))),
        }
    }
}

/// Current allocation with each recommended resource set to its target.
/// Containers without a recommendation are left out.
fn apply_targets(state: &WorkloadState, recs: &[Recommendation]) -> Vec<ContainerResources> {
    state
        .containers
        .iter()
        .filter_map(|c| {
            let mut resources = c.resources;
            let mut any = false;
            for rec in recs.iter().filter(|r| r.container_name == c.name) {
                resources.set(rec.resource, rec.target);
                any = true;
            }
            any.then(|| ContainerResources {
                name: c.name.clone(),
                resources,
            })
        })
        .collect()
}
