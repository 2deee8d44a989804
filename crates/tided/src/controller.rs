//! Standalone workload controller.
//!
//! Without a cluster behind it, the daemon keeps each target's workload
//! state in the `workloads` table and applies mutations to it directly:
//!
//! - replica patches add instances (newest ids) or remove the newest ones;
//! - in-place patches rewrite the template and every running instance;
//! - evictions recreate the instance under a fresh id.
//!
//! New instances are admitted with the template allocation overridden by
//! the stabilized shape of the newest decision event that carries one,
//! unless the target's vertical mode is `off`. That is the shape the
//! reconciler measures staleness against, so a replacement is not stale
//! again on the next tick. Observed usage is not carried over to a new
//! instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use tracing::{debug, info};

use tidegrid_autoscale::{BoxFuture, WorkloadController};
use tidegrid_state::{
    ContainerResources, ContainerStatus, DECISION_RETENTION, InstanceState, Resources, StateStore,
    UpdateMode, WorkloadState,
};

pub struct StoreController {
    store: StateStore,
    seq: AtomicU64,
}

impl StoreController {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            seq: AtomicU64::new(0),
        }
    }

    fn load(&self, target_id: &str) -> anyhow::Result<WorkloadState> {
        self.store
            .get_workload(target_id)?
            .ok_or_else(|| anyhow!("no workload state for {target_id}"))
    }

    /// Allocation a newly created instance receives.
    fn admitted(&self, state: &WorkloadState) -> anyhow::Result<Vec<ContainerResources>> {
        let mut containers = state.containers.clone();
        let mode = self
            .store
            .get_target(&state.target_id)?
            .and_then(|c| c.vertical)
            .map(|v| v.update_mode);
        if matches!(mode, None | Some(UpdateMode::Off)) {
            return Ok(containers);
        }
        let shape = self
            .store
            .list_decisions(&state.target_id, DECISION_RETENTION)?
            .into_iter()
            .find(|e| !e.desired_resources.is_empty())
            .map(|e| e.desired_resources)
            .unwrap_or_default();
        for want in &shape {
            if let Some(c) = containers.iter_mut().find(|c| c.name == want.name) {
                c.resources = want.resources;
            }
        }
        Ok(containers)
    }

    fn new_instance(&self, containers: &[ContainerResources]) -> InstanceState {
        let now = epoch_secs();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        InstanceState {
            id: format!("i-{now}-{seq}"),
            created_at: now,
            containers: containers
                .iter()
                .map(|c| ContainerStatus {
                    name: c.name.clone(),
                    resources: c.resources,
                    usage: Resources::default(),
                })
                .collect(),
        }
    }
}

impl WorkloadController for StoreController {
    fn current_state<'a>(&'a self, target_id: &'a str) -> BoxFuture<'a, WorkloadState> {
        Box::pin(async move { self.load(target_id) })
    }

    fn patch_replicas<'a>(&'a self, target_id: &'a str, replicas: u32) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.load(target_id)?;
            let from = state.replicas;
            if (state.instances.len() as u32) < replicas {
                let admitted = self.admitted(&state)?;
                while (state.instances.len() as u32) < replicas {
                    let instance = self.new_instance(&admitted);
                    state.instances.push(instance);
                }
            } else {
                // Oldest first, so truncation drops the newest.
                state
                    .instances
                    .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                state.instances.truncate(replicas as usize);
            }
            state.replicas = replicas;
            self.store.put_workload(&state)?;
            debug!(%target_id, from, to = replicas, "standalone replicas set");
            Ok(())
        })
    }

    fn patch_container_resources<'a>(
        &'a self,
        target_id: &'a str,
        container_name: &'a str,
        resources: Resources,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.load(target_id)?;
            let template = state
                .containers
                .iter_mut()
                .find(|c| c.name == container_name)
                .ok_or_else(|| anyhow!("{target_id} has no container {container_name}"))?;
            template.resources = resources;
            for c in state
                .instances
                .iter_mut()
                .flat_map(|i| i.containers.iter_mut())
                .filter(|c| c.name == container_name)
            {
                c.resources = resources;
            }
            self.store.put_workload(&state)?;
            debug!(%target_id, container = %container_name, "standalone container resized");
            Ok(())
        })
    }

    fn evict_instance<'a>(&'a self, target_id: &'a str, instance_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.load(target_id)?;
            let pos = state
                .instances
                .iter()
                .position(|i| i.id == instance_id)
                .ok_or_else(|| anyhow!("{target_id} has no instance {instance_id}"))?;
            let admitted = self.admitted(&state)?;
            let replacement = self.new_instance(&admitted);
            info!(%target_id, evicted = %instance_id, replacement = %replacement.id, "instance recreated");
            state.instances[pos] = replacement;
            self.store.put_workload(&state)?;
            Ok(())
        })
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
