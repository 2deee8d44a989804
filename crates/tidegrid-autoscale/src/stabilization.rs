//! Stabilization tracker. Damps downward changes so targets do not flap.
//!
//! Every tick appends one [`DecisionRecord`] to the target's stream. Records
//! older than the window are pruned, except the newest of them: it holds the
//! value in force when the window opened, so a gap in the stream (ticks that
//! ended before recording) never counts as a low observation. Upward changes
//! pass straight through. A downward change is applied only once the stream
//! reaches back to the window's start, and then only down to the highest
//! value recorded since: the lower value must have persisted for the full
//! window.

use std::collections::VecDeque;
use std::time::Duration;

use tidegrid_state::{ContainerResources, DecisionRecord, ResourceName, VerticalPolicy, WorkloadState};

/// The decision stream of one target.
#[derive(Debug)]
pub struct StabilizationTracker {
    window: Duration,
    records: VecDeque<DecisionRecord>,
}

impl StabilizationTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            records: VecDeque::new(),
        }
    }

    /// Change the window (policies are re-read each tick).
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Append this tick's record and prune everything that ended before the
    /// window opened.
    pub fn record(&mut self, record: DecisionRecord) {
        let now = record.timestamp;
        self.records.push_back(record);
        let Some(cutoff) = self.window_start(now) else {
            return;
        };
        while self
            .records
            .get(1)
            .is_some_and(|next| millis(next.timestamp) <= cutoff)
        {
            self.records.pop_front();
        }
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the replica stream reaches back to the start of the window.
    pub fn spans_window(&self, now: u64) -> bool {
        self.covers(now, |r| r.desired_replicas.is_some())
    }

    /// Stabilized replica count for a candidate already recorded this tick.
    pub fn stabilize_replicas(&self, current: u32, candidate: u32, now: u64) -> u32 {
        if candidate >= current {
            return candidate;
        }
        if !self.spans_window(now) {
            return current;
        }
        let highest = self
            .records
            .iter()
            .filter_map(|r| r.desired_replicas)
            .max()
            .unwrap_or(candidate);
        current.min(highest)
    }

    /// Stabilized per-container allocation.
    ///
    /// `desired` is this tick's raw recommendation (already recorded).
    /// Changes smaller than `min_change_percent` keep the current value.
    pub fn stabilize_resources(
        &self,
        state: &WorkloadState,
        desired: &[ContainerResources],
        policy: &VerticalPolicy,
        now: u64,
    ) -> Vec<ContainerResources> {
        if !policy.stabilize {
            return desired.to_vec();
        }
        let spans = self.covers(now, |r| r.desired_resources.is_some());

        desired
            .iter()
            .map(|want| {
                let Some(current) = state.container(&want.name) else {
                    return want.clone();
                };
                let mut resources = *current;
                for resource in ResourceName::ALL {
                    let (cur, tgt) = (current.get(resource), want.resources.get(resource));
                    let value = if cur == 0 {
                        tgt
                    } else if change_percent(cur, tgt) < policy.min_change_percent {
                        cur
                    } else if tgt > cur {
                        tgt
                    } else if spans {
                        cur.min(self.highest_resource(&want.name, resource).unwrap_or(tgt))
                    } else {
                        cur
                    };
                    resources.set(resource, value);
                }
                ContainerResources {
                    name: want.name.clone(),
                    resources,
                }
            })
            .collect()
    }

    fn highest_resource(&self, container: &str, resource: ResourceName) -> Option<u64> {
        self.records
            .iter()
            .filter_map(|r| r.desired_resources.as_ref())
            .flat_map(|containers| containers.iter())
            .filter(|c| c.name == container)
            .map(|c| c.resources.get(resource))
            .max()
    }

    /// Window start in milliseconds, `None` while `now` is inside the first
    /// window of the clock.
    fn window_start(&self, now: u64) -> Option<u64> {
        let window = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        millis(now).checked_sub(window)
    }

    fn covers(&self, now: u64, carries: impl Fn(&DecisionRecord) -> bool) -> bool {
        self.window_start(now).is_some_and(|start| {
            self.records
                .iter()
                .any(|r| millis(r.timestamp) <= start && carries(r))
        })
    }
}

fn millis(secs: u64) -> u64 {
    secs.saturating_mul(1000)
}

/// Relative size of a change, in percent of the current value.
pub fn change_percent(current: u64, target: u64) -> f64 {
    if current == 0 {
        return if target == 0 { 0.0 } else { f64::INFINITY };
    }
    (target as f64 - current as f64).abs() / current as f64 * 100.0
}
