//! Seams to the outside world: the workload controller, the configuration
//! source, and where decision events go.
//!
//! The reconciler never touches a workload directly. Every mutation goes
//! through [`WorkloadController`]; every policy read goes through
//! [`ConfigSource`]; every tick ends in one [`DecisionSink::emit`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::info;

use tidegrid_state::{DecisionEvent, Resources, StateStore, TargetConfig, TargetId, WorkloadState};

/// Boxed future alias for the async trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// The runtime that owns the workload.
pub trait WorkloadController: Send + Sync {
    /// Declared replicas, per-container allocation, and running instances.
    fn current_state<'a>(&'a self, target_id: &'a str) -> BoxFuture<'a, WorkloadState>;

    fn patch_replicas<'a>(&'a self, target_id: &'a str, replicas: u32) -> BoxFuture<'a, ()>;

    /// Resize one container of every instance without recreating them.
    fn patch_container_resources<'a>(
        &'a self,
        target_id: &'a str,
        container_name: &'a str,
        resources: Resources,
    ) -> BoxFuture<'a, ()>;

    /// Evict one instance so that it is recreated with fresh allocations.
    fn evict_instance<'a>(&'a self, target_id: &'a str, instance_id: &'a str) -> BoxFuture<'a, ()>;
}

/// Where target configs live.
pub trait ConfigSource: Send + Sync {
    fn list_targets(&self) -> BoxFuture<'_, Vec<TargetId>>;

    /// `None` means the target was deleted.
    fn fetch<'a>(&'a self, target_id: &'a str) -> BoxFuture<'a, Option<TargetConfig>>;
}

/// Receiver of the per-tick decision events.
pub trait DecisionSink: Send + Sync {
    fn emit<'a>(&'a self, event: &'a DecisionEvent) -> BoxFuture<'a, ()>;
}

// ── Store-backed implementations ───────────────────────────────────

impl ConfigSource for StateStore {
    fn list_targets(&self) -> BoxFuture<'_, Vec<TargetId>> {
        Box::pin(async move { Ok(self.list_target_ids()?) })
    }

    fn fetch<'a>(&'a self, target_id: &'a str) -> BoxFuture<'a, Option<TargetConfig>> {
        Box::pin(async move { Ok(self.get_target(target_id)?) })
    }
}

impl DecisionSink for StateStore {
    fn emit<'a>(&'a self, event: &'a DecisionEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move { Ok(self.put_decision(event)?) })
    }
}

// ── Sinks ──────────────────────────────────────────────────────────

/// Logs every event as one structured record.
pub struct TracingSink;

impl DecisionSink for TracingSink {
    fn emit<'a>(&'a self, event: &'a DecisionEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let horizontal = event.horizontal.as_ref();
            let json = serde_json::to_string(event)?;
            info!(
                target_id = %event.target_id,
                current = ?event.current_replicas,
                candidate = ?horizontal.map(|h| h.candidate),
                stabilized = ?horizontal.map(|h| h.stabilized),
                recommendations = event.recommendations.len(),
                vertical_actions = event.vertical.len(),
                vertical_suppressed = event.conflict.vertical_suppressed,
                error = ?event.error,
                event = %json,
                "autoscale decision"
            );
            Ok(())
        })
    }
}

/// Forwards each event to several sinks; the first error is returned
/// after every sink has been tried.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DecisionSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn DecisionSink>>) -> Self {
        Self { sinks }
    }
}

impl DecisionSink for FanoutSink {
    fn emit<'a>(&'a self, event: &'a DecisionEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut first_err = None;
            for sink in &self.sinks {
                if let Err(e) = sink.emit(event).await {
                    first_err.get_or_insert(e);
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}
