//! Keeps the horizontal and vertical axes from fighting over one target.
//!
//! When a target has both a horizontal and a vertical policy and the
//! vertical mode can disrupt instances (`Recreate` or `Auto`), vertical
//! actuation is withheld on any tick whose horizontal decision changes the
//! replica count, and on the tick right after a horizontal actuation. The
//! guard also reports dimensions both axes act on (a horizontal `cpu` or
//! `memory` metric while the vertical axis sizes that resource).

use tracing::{debug, warn};

use tidegrid_state::{ConflictReport, ResourceName, TargetConfig, UpdateMode};

/// Per-target conflict memory.
#[derive(Debug, Default)]
pub struct ConflictGuard {
    /// Whether the previous tick applied a horizontal change.
    horizontal_applied_last_tick: bool,
    /// Overlap already warned about, so the warning fires once per change.
    warned_overlap: Vec<ResourceName>,
}

impl ConflictGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vet this tick. `replicas_change` is whether the stabilized horizontal
    /// decision differs from the current replica count.
    pub fn check(&mut self, config: &TargetConfig, replicas_change: bool) -> ConflictReport {
        let (Some(horizontal), Some(vertical)) = (&config.horizontal, &config.vertical) else {
            self.warned_overlap.clear();
            return ConflictReport::default();
        };

        let mut overlap: Vec<ResourceName> = horizontal
            .metrics
            .iter()
            .filter_map(|m| ResourceName::from_metric_name(&m.name))
            .collect();
        overlap.sort();
        overlap.dedup();

        let target_id = config.id();
        if !overlap.is_empty() && overlap != self.warned_overlap {
            warn!(
                %target_id,
                overlap = ?overlap,
                "horizontal and vertical policies both act on the same resources"
            );
        }
        self.warned_overlap.clone_from(&overlap);

        let disruptive = matches!(vertical.update_mode, UpdateMode::Recreate | UpdateMode::Auto);
        let vertical_suppressed =
            disruptive && (replicas_change || self.horizontal_applied_last_tick);
        if vertical_suppressed {
            debug!(
                %target_id,
                replicas_change,
                after_horizontal = self.horizontal_applied_last_tick,
                "vertical actuation suppressed"
            );
        }

        ConflictReport {
            overlap,
            vertical_suppressed,
        }
    }

    /// Remember whether this tick's horizontal actuation was applied.
    pub fn record_horizontal(&mut self, applied: bool) {
        self.horizontal_applied_last_tick = applied;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidegrid_state::{HorizontalPolicy, MetricSpec, MetricTargetType, ScalingTarget, VerticalPolicy};

    fn config(metric: &str, mode: Option<UpdateMode>) -> TargetConfig {
        TargetConfig {
            target: ScalingTarget::new("default", "deployment", "api"),
            horizontal: Some(HorizontalPolicy {
                min_replicas: 1,
                max_replicas: 10,
                metrics: vec![MetricSpec {
                    name: metric.to_string(),
                    target_value: 50.0,
                    target_type: MetricTargetType::AverageValue,
                }],
                stabilization_window: "5m".to_string(),
            }),
            vertical: mode.map(|update_mode| VerticalPolicy {
                update_mode,
                ..serde_json::from_str::<VerticalPolicy>("{}").unwrap()
            }),
            resize_policies: Vec::new(),
        }
    }

    #[test]
    fn horizontal_only_never_conflicts() {
        let mut guard = ConflictGuard::new();
        let report = guard.check(&config("cpu", None), true);
        assert_eq!(report, ConflictReport::default());
    }

    #[test]
    fn replica_change_suppresses_disruptive_vertical() {
        let mut guard = ConflictGuard::new();
        assert!(guard.check(&config("rps", Some(UpdateMode::Auto)), true).vertical_suppressed);
        assert!(guard.check(&config("rps", Some(UpdateMode::Recreate)), true).vertical_suppressed);
        assert!(!guard.check(&config("rps", Some(UpdateMode::Recreate)), false).vertical_suppressed);
    }

    #[test]
    fn non_disruptive_modes_are_never_suppressed() {
        let mut guard = ConflictGuard::new();
        guard.record_horizontal(true);
        assert!(!guard.check(&config("rps", Some(UpdateMode::Off)), true).vertical_suppressed);
        assert!(!guard.check(&config("rps", Some(UpdateMode::Initial)), true).vertical_suppressed);
    }

    #[test]
    fn tick_after_horizontal_actuation_is_suppressed() {
        let mut guard = ConflictGuard::new();
        let cfg = config("rps", Some(UpdateMode::Auto));
        guard.record_horizontal(true);
        assert!(guard.check(&cfg, false).vertical_suppressed);
        guard.record_horizontal(false);
        assert!(!guard.check(&cfg, false).vertical_suppressed);
    }

    #[test]
    fn overlap_reports_shared_resource() {
        let mut guard = ConflictGuard::new();
        let report = guard.check(&config("memory", Some(UpdateMode::Off)), false);
        assert_eq!(report.overlap, vec![ResourceName::Memory]);

        let report = guard.check(&config("rps", Some(UpdateMode::Off)), false);
        assert!(report.overlap.is_empty());
    }
}
