//! Convergence actuator — the only code that mutates a workload.
//!
//! Issues the minimal set of controller calls for a tick: one replica patch
//! when the stabilized count differs from the live one, then one call per
//! vertical action. Every call is bounded by `call_timeout`. An error or
//! timeout becomes [`Actuation::Failed`] in the event; there is no local
//! retry, the next tick simply tries again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tidegrid_state::{
    Actuation, HorizontalPolicy, ResourceName, VerticalActionKind, WorkloadState,
};

use crate::controller::WorkloadController;
use crate::error::AutoscaleError;
use crate::horizontal;
use crate::policy::VerticalAction;

pub struct Actuator {
    controller: Arc<dyn WorkloadController>,
    call_timeout: Duration,
}

impl Actuator {
    pub fn new(controller: Arc<dyn WorkloadController>, call_timeout: Duration) -> Self {
        Self {
            controller,
            call_timeout,
        }
    }

    /// Converge the replica count. Identical values are a no-op.
    pub async fn scale(
        &self,
        target_id: &str,
        current: u32,
        desired: u32,
        policy: &HorizontalPolicy,
    ) -> Actuation {
        let desired = horizontal::clamp(desired, policy);
        if desired == current {
            return Actuation::NoOp;
        }
        let result = self
            .bounded("patch_replicas", self.controller.patch_replicas(target_id, desired))
            .await;
        match result {
            Ok(()) => {
                info!(%target_id, from = current, to = desired, "replicas patched");
                Actuation::Applied
            }
            Err(e) => failed(target_id, e),
        }
    }

    /// Carry out one vertical action.
    pub async fn apply(
        &self,
        target_id: &str,
        action: &VerticalAction,
        state: &WorkloadState,
    ) -> Actuation {
        match action.kind {
            VerticalActionKind::Observe => Actuation::Observed,
            VerticalActionKind::ResizeInPlace => {
                let Some(resources) = action.resources else {
                    return Actuation::NoOp;
                };
                if state.container(&action.container_name) == Some(&resources) {
                    return Actuation::NoOp;
                }
                let working_set = state.observed_usage(&action.container_name, ResourceName::Memory);
                if resources.memory_bytes < working_set {
                    debug!(
                        %target_id,
                        container = %action.container_name,
                        memory = resources.memory_bytes,
                        working_set,
                        "in-place resize deferred"
                    );
                    return Actuation::Deferred {
                        reason: format!(
                            "memory {} below observed working set {working_set}",
                            resources.memory_bytes
                        ),
                    };
                }
                let result = self
                    .bounded(
                        "patch_container_resources",
                        self.controller.patch_container_resources(
                            target_id,
                            &action.container_name,
                            resources,
                        ),
                    )
                    .await;
                match result {
                    Ok(()) => {
                        info!(
                            %target_id,
                            container = %action.container_name,
                            cpu = resources.cpu_millicores,
                            memory = resources.memory_bytes,
                            "container resized in place"
                        );
                        Actuation::Applied
                    }
                    Err(e) => failed(target_id, e),
                }
            }
            VerticalActionKind::Evict => {
                let Some(instance_id) = action.instance_id.as_deref() else {
                    return Actuation::NoOp;
                };
                let result = self
                    .bounded(
                        "evict_instance",
                        self.controller.evict_instance(target_id, instance_id),
                    )
                    .await;
                match result {
                    Ok(()) => {
                        info!(%target_id, %instance_id, container = %action.container_name, "instance evicted");
                        Actuation::Applied
                    }
                    Err(e) => failed(target_id, e),
                }
            }
        }
    }

    async fn bounded<F>(&self, operation: &str, call: F) -> Result<(), AutoscaleError>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AutoscaleError::ActuationFailed {
                operation: operation.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(AutoscaleError::ActuationFailed {
                operation: operation.to_string(),
                reason: format!("timed out after {:?}", self.call_timeout),
            }),
        }
    }
}

fn failed(target_id: &str, e: AutoscaleError) -> Actuation {
    warn!(%target_id, error = %e, "actuation failed");
    Actuation::Failed {
        error: e.to_string(),
    }
}
