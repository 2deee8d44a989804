//! Loop supervisor — one background task per scaling target.
//!
//! The `Supervisor` lists targets from the [`ConfigSource`], spawns a loop
//! per target, and stops loops whose target disappeared. Each loop ticks on
//! a fixed interval; a tick runs to completion before the next sleep starts.
//! Stopping a loop signals it through a `watch` channel: a tick already in
//! flight finishes, but its event is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tidegrid_metrics::{MetricSampler, MetricsProvider};
use tidegrid_state::{DecisionEvent, TargetId};

use crate::controller::{ConfigSource, DecisionSink, WorkloadController};
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::validate::validate;

/// Supervisor timing.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub tick_interval: Duration,
    pub discovery_interval: Duration,
    /// Ceiling of the backoff applied while a target's config is invalid.
    pub invalid_config_backoff_max: Duration,
    pub reconciler: ReconcilerSettings,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(15),
            discovery_interval: Duration::from_secs(30),
            invalid_config_backoff_max: Duration::from_secs(300),
            reconciler: ReconcilerSettings::default(),
        }
    }
}

/// Collaborators every loop needs.
#[derive(Clone)]
struct LoopDeps {
    source: Arc<dyn ConfigSource>,
    controller: Arc<dyn WorkloadController>,
    provider: Arc<dyn MetricsProvider>,
    sink: Arc<dyn DecisionSink>,
    config: SupervisorConfig,
}

struct LoopSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Owns the per-target autoscale loops.
pub struct Supervisor {
    deps: LoopDeps,
    /// Active loops: target_id → slot.
    loops: Arc<RwLock<HashMap<TargetId, LoopSlot>>>,
}

impl Supervisor {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        controller: Arc<dyn WorkloadController>,
        provider: Arc<dyn MetricsProvider>,
        sink: Arc<dyn DecisionSink>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            deps: LoopDeps {
                source,
                controller,
                provider,
                sink,
                config,
            },
            loops: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the loop for a target, replacing any running one.
    pub async fn start(&self, target_id: &str) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let deps = self.deps.clone();
        let id = target_id.to_string();
        let handle = tokio::spawn(async move {
            run_target_loop(id, deps, shutdown_rx).await;
        });

        let mut loops = self.loops.write().await;
        if let Some(old) = loops.insert(
            target_id.to_string(),
            LoopSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
        }
        info!(%target_id, "autoscale loop started");
    }

    /// Stop a target's loop. Its in-flight tick, if any, is discarded.
    pub async fn stop(&self, target_id: &str) {
        let slot = self.loops.write().await.remove(target_id);
        if let Some(slot) = slot {
            let _ = slot.shutdown_tx.send(true);
            info!(%target_id, "autoscale loop stopped");
        }
    }

    /// Stop every loop and wait for them to exit.
    pub async fn stop_all(&self) {
        let slots: Vec<(TargetId, LoopSlot)> = self.loops.write().await.drain().collect();
        for (_, slot) in &slots {
            let _ = slot.shutdown_tx.send(true);
        }
        for (id, slot) in slots {
            if let Err(e) = slot.handle.await {
                warn!(target_id = %id, error = %e, "autoscale loop ended abnormally");
            }
        }
        info!("all autoscale loops stopped");
    }

    /// Target IDs with a running loop.
    pub async fn active_loops(&self) -> Vec<TargetId> {
        let loops = self.loops.read().await;
        let mut ids: Vec<TargetId> = loops
            .iter()
            .filter(|(_, slot)| !slot.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn is_running(&self, target_id: &str) -> bool {
        let loops = self.loops.read().await;
        loops
            .get(target_id)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    /// Reconcile the set of loops with the targets the source lists.
    pub async fn sync(&self) -> anyhow::Result<()> {
        let listed = tokio::time::timeout(
            self.deps.config.reconciler.call_timeout,
            self.deps.source.list_targets(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("listing targets timed out"))??;

        let stale: Vec<TargetId> = {
            let loops = self.loops.read().await;
            loops
                .iter()
                .filter(|(id, slot)| !listed.contains(*id) || slot.handle.is_finished())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &stale {
            self.stop(id).await;
        }

        for id in &listed {
            if !self.is_running(id).await {
                self.start(id).await;
            }
        }
        debug!(targets = listed.len(), stopped = stale.len(), "target discovery complete");
        Ok(())
    }

    /// Discover targets until `shutdown` fires, then stop every loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_secs = self.deps.config.tick_interval.as_secs(),
            discovery_secs = self.deps.config.discovery_interval.as_secs(),
            "autoscale supervisor started"
        );

        loop {
            if let Err(e) = self.sync().await {
                error!(error = %e, "target discovery failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.deps.config.discovery_interval) => {}
                _ = shutdown.changed() => {
                    info!("autoscale supervisor shutting down");
                    break;
                }
            }
        }
        self.stop_all().await;
    }
}

// ── Config backoff ─────────────────────────────────────────────────

/// Tick spacing for one target: the tick interval while the config is
/// valid, doubling up to a ceiling while it is not.
#[derive(Debug, Clone)]
pub struct ConfigBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl ConfigBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    pub fn next_interval(&self) -> Duration {
        self.current
    }

    /// Record an invalid config; returns the new interval.
    pub fn fail(&mut self) -> Duration {
        self.current = (self.current * 2).min(self.max);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

// ── Target loop ────────────────────────────────────────────────────

async fn run_target_loop(target_id: TargetId, deps: LoopDeps, mut shutdown: watch::Receiver<bool>) {
    let settings = deps.config.reconciler;
    let sampler = MetricSampler::new(deps.provider.clone(), settings.call_timeout);
    let mut reconciler = Reconciler::new(&target_id, deps.controller.clone(), sampler, settings);
    let mut backoff = ConfigBackoff::new(
        deps.config.tick_interval,
        deps.config.invalid_config_backoff_max,
    );

    debug!(%target_id, "autoscale loop running");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(backoff.next_interval()) => {}
            _ = shutdown.changed() => break,
        }

        let fetched = tokio::time::timeout(settings.call_timeout, deps.source.fetch(&target_id)).await;
        let config = match fetched {
            Ok(Ok(Some(config))) => config,
            Ok(Ok(None)) => {
                info!(%target_id, "target deleted, loop exiting");
                break;
            }
            Ok(Err(e)) => {
                error!(%target_id, error = %e, "failed to fetch target config");
                continue;
            }
            Err(_) => {
                error!(%target_id, "fetching target config timed out");
                continue;
            }
        };

        let now = epoch_secs();
        let event = match validate(&config) {
            Ok(validated) => {
                backoff.reset();
                reconciler.tick(&validated, now).await
            }
            Err(e) => {
                let retry_in = backoff.fail();
                warn!(%target_id, error = %e, retry_in_secs = retry_in.as_secs(), "invalid target config");
                let mut event = DecisionEvent::empty(&target_id, now);
                event.error = Some(e.to_string());
                event
            }
        };

        if *shutdown.borrow() {
            debug!(%target_id, "loop stopped during tick, discarding event");
            break;
        }
        if let Err(e) = deps.sink.emit(&event).await {
            error!(%target_id, error = %e, "failed to emit decision event");
        }
    }

    debug!(%target_id, "autoscale loop exited");
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
