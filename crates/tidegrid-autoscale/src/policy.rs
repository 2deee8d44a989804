//! How a vertical recommendation reaches the workload.
//!
//! A pure function of the update mode and the tick's inputs:
//!
//! ```text
//! Off       → Observe every container; never actuate
//! Initial   → first tick with a recommendation: resize NotRequired resources
//!             in place; afterwards leave it to admission; never evict
//! Recreate  → evict one stale instance per tick
//! Auto      → resize in place if every changed resource is NotRequired and
//!             the controller supports it; otherwise behave like Recreate
//! ```
//!
//! Evictions only target containers whose recommendation was already
//! published on an earlier tick, so the replacement is admitted with the
//! same allocation the stale check compares against.
//!
//! The mode is operator configuration and is re-read every tick; nothing
//! here transitions it.

use std::collections::HashSet;

use tidegrid_state::{
    ContainerResources, InstanceId, InstanceState, ResourceName, Resources, RestartPolicy,
    TargetConfig, UpdateMode, VerticalActionKind, WorkloadState,
};

use crate::stabilization::change_percent;

/// One planned vertical mutation (or observation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerticalAction {
    pub container_name: String,
    pub kind: VerticalActionKind,
    pub instance_id: Option<InstanceId>,
    /// Full allocation the container should end up with.
    pub resources: Option<Resources>,
}

impl VerticalAction {
    fn observe(container: &ContainerResources) -> Self {
        Self {
            container_name: container.name.clone(),
            kind: VerticalActionKind::Observe,
            instance_id: None,
            resources: Some(container.resources),
        }
    }

    fn resize(container: &str, resources: Resources) -> Self {
        Self {
            container_name: container.to_string(),
            kind: VerticalActionKind::ResizeInPlace,
            instance_id: None,
            resources: Some(resources),
        }
    }
}

/// Everything the evaluator looks at for one tick.
pub struct PolicyInput<'a> {
    pub config: &'a TargetConfig,
    pub state: &'a WorkloadState,
    /// Stabilized desired allocation per container.
    pub desired: &'a [ContainerResources],
    /// Containers that already had a recommendation on an earlier tick.
    /// Only these are eligible for eviction.
    pub initialized: &'a HashSet<String>,
    /// Instance allocations within this percentage of desired are not stale.
    pub tolerance_percent: f64,
}

/// Plan the vertical actions for one tick.
pub fn evaluate(mode: UpdateMode, input: &PolicyInput<'_>) -> Vec<VerticalAction> {
    match mode {
        UpdateMode::Off => input.desired.iter().map(VerticalAction::observe).collect(),
        UpdateMode::Initial => evaluate_initial(input),
        UpdateMode::Recreate => evict_one_stale(input).into_iter().collect(),
        UpdateMode::Auto => evaluate_auto(input),
    }
}

fn evaluate_initial(input: &PolicyInput<'_>) -> Vec<VerticalAction> {
    let mut actions = Vec::new();
    for want in input.desired {
        if input.initialized.contains(&want.name) {
            continue;
        }
        let Some(current) = input.state.container(&want.name) else {
            actions.push(VerticalAction::observe(want));
            continue;
        };
        // Only resources that can change without a restart are patched.
        let mut patched = *current;
        for resource in changed_resources(current, &want.resources) {
            if input.config.restart_policy(&want.name, resource) == RestartPolicy::NotRequired {
                patched.set(resource, want.resources.get(resource));
            }
        }
        if patched != *current && input.state.in_place_resize {
            actions.push(VerticalAction::resize(&want.name, patched));
        } else {
            actions.push(VerticalAction::observe(want));
        }
    }
    actions
}

fn evaluate_auto(input: &PolicyInput<'_>) -> Vec<VerticalAction> {
    let mut actions = Vec::new();
    let mut needs_recreate = false;

    for want in input.desired {
        let Some(current) = input.state.container(&want.name) else {
            continue;
        };
        let changed = changed_resources(current, &want.resources);
        if changed.is_empty() {
            continue;
        }
        let in_place = input.state.in_place_resize
            && changed.iter().all(|r| {
                input.config.restart_policy(&want.name, *r) == RestartPolicy::NotRequired
            });
        if in_place {
            actions.push(VerticalAction::resize(&want.name, want.resources));
        } else {
            needs_recreate = true;
        }
    }

    // Resized containers converge without eviction, so recreate only for
    // the rest. Instances already carrying the desired shape are not stale.
    if needs_recreate || actions.is_empty() {
        let resized: HashSet<&str> = actions.iter().map(|a| a.container_name.as_str()).collect();
        let remaining: Vec<ContainerResources> = input
            .desired
            .iter()
            .filter(|c| !resized.contains(c.name.as_str()))
            .cloned()
            .collect();
        let rest = PolicyInput {
            desired: &remaining,
            ..*input
        };
        actions.extend(evict_one_stale(&rest));
    }
    actions
}

/// Evict the oldest instance whose allocation differs from the desired one.
fn evict_one_stale(input: &PolicyInput<'_>) -> Option<VerticalAction> {
    let mut stale: Vec<(&InstanceState, &ContainerResources)> = input
        .state
        .instances
        .iter()
        .filter_map(|inst| {
            input
                .desired
                .iter()
                .filter(|want| input.initialized.contains(&want.name))
                .find(|want| is_stale(inst, want, input.tolerance_percent))
                .map(|want| (inst, want))
        })
        .collect();
    stale.sort_by(|(a, _), (b, _)| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    stale.first().map(|(inst, want)| VerticalAction {
        container_name: want.name.clone(),
        kind: VerticalActionKind::Evict,
        instance_id: Some(inst.id.clone()),
        resources: Some(want.resources),
    })
}

fn is_stale(instance: &InstanceState, want: &ContainerResources, tolerance_percent: f64) -> bool {
    instance.container(&want.name).is_some_and(|c| {
        ResourceName::ALL.iter().any(|r| {
            let (have, target) = (c.resources.get(*r), want.resources.get(*r));
            have != target && change_percent(target, have) >= tolerance_percent
        })
    })
}

fn changed_resources(current: &Resources, desired: &Resources) -> Vec<ResourceName> {
    ResourceName::ALL
        .into_iter()
        .filter(|r| current.get(*r) != desired.get(*r))
        .collect()
}
