//! Target config validation.
//!
//! Policies are read fresh every tick and validated before any decision is
//! made. A config that fails here is `ConfigInvalid`: the loop keeps the
//! target parked on a backoff until the operator corrects it.

use std::time::Duration;

use tidegrid_state::{
    parse_duration, MetricTargetType, ResourceName, TargetConfig, VerticalPolicy,
};

use crate::error::{AutoscaleError, AutoscaleResult};

/// Window used when the target has no horizontal policy to take it from.
pub const DEFAULT_STABILIZATION_WINDOW: Duration = Duration::from_secs(300);

/// A target config whose duration strings have been parsed and whose
/// invariants hold.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub config: TargetConfig,
    /// Stabilization window for both axes.
    pub stabilization_window: Duration,
    pub lookback: Duration,
    pub half_life: Duration,
}

impl ValidatedConfig {
    pub fn target_id(&self) -> String {
        self.config.id()
    }
}

/// Check a target config and parse its durations.
pub fn validate(config: &TargetConfig) -> AutoscaleResult<ValidatedConfig> {
    let id = config.id();

    if config.horizontal.is_none() && config.vertical.is_none() {
        return Err(AutoscaleError::invalid(&id, "neither horizontal nor vertical policy set"));
    }

    let mut stabilization_window = DEFAULT_STABILIZATION_WINDOW;
    if let Some(h) = &config.horizontal {
        if h.min_replicas > h.max_replicas {
            return Err(AutoscaleError::invalid(
                &id,
                format!("min_replicas {} > max_replicas {}", h.min_replicas, h.max_replicas),
            ));
        }
        if h.metrics.is_empty() {
            return Err(AutoscaleError::invalid(&id, "horizontal policy has no metrics"));
        }
        for m in &h.metrics {
            if !m.target_value.is_finite() || m.target_value <= 0.0 {
                return Err(AutoscaleError::invalid(
                    &id,
                    format!("metric {}: target_value must be > 0", m.name),
                ));
            }
            if m.target_type == MetricTargetType::Utilization
                && ResourceName::from_metric_name(&m.name).is_none()
            {
                return Err(AutoscaleError::invalid(
                    &id,
                    format!("metric {}: utilization targets need cpu or memory", m.name),
                ));
            }
        }
        stabilization_window = duration(&id, "stabilization_window", &h.stabilization_window)?;
    }

    let (mut lookback, mut half_life) = (Duration::ZERO, Duration::ZERO);
    if let Some(v) = &config.vertical {
        check_vertical(&id, v)?;
        lookback = duration(&id, "lookback", &v.lookback)?;
        half_life = duration(&id, "half_life", &v.half_life)?;
        if half_life.is_zero() {
            return Err(AutoscaleError::invalid(&id, "half_life must be > 0"));
        }
    }

    Ok(ValidatedConfig {
        config: config.clone(),
        stabilization_window,
        lookback,
        half_life,
    })
}

fn check_vertical(id: &str, policy: &VerticalPolicy) -> AutoscaleResult<()> {
    if !policy.safety_factor.is_finite() || policy.safety_factor < 1.0 {
        return Err(AutoscaleError::invalid(id, "safety_factor must be >= 1.0"));
    }
    if !policy.min_change_percent.is_finite() || policy.min_change_percent < 0.0 {
        return Err(AutoscaleError::invalid(id, "min_change_percent must be >= 0"));
    }
    for p in &policy.container_policies {
        for resource in ResourceName::ALL {
            let (min, max) = (p.min_allowed.get(resource), p.max_allowed.get(resource));
            if min > max {
                return Err(AutoscaleError::invalid(
                    id,
                    format!(
                        "container {}: min_allowed.{resource} {min} > max_allowed.{resource} {max}",
                        p.container_name
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn duration(id: &str, field: &str, value: &str) -> AutoscaleResult<Duration> {
    parse_duration(value)
        .ok_or_else(|| AutoscaleError::invalid(id, format!("{field}: unparsable duration {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidegrid_state::{
        ContainerResourcePolicy, HorizontalPolicy, MetricSpec, Resources, ScalingTarget,
    };

    fn horizontal(min: u32, max: u32) -> HorizontalPolicy {
        HorizontalPolicy {
            min_replicas: min,
            max_replicas: max,
            metrics: vec![MetricSpec {
                name: "cpu".to_string(),
                target_value: 50.0,
                target_type: MetricTargetType::Utilization,
            }],
            stabilization_window: "5m".to_string(),
        }
    }

    fn config(horizontal: Option<HorizontalPolicy>, vertical: Option<VerticalPolicy>) -> TargetConfig {
        TargetConfig {
            target: ScalingTarget::new("default", "deployment", "api"),
            horizontal,
            vertical,
            resize_policies: Vec::new(),
        }
    }

    fn vertical() -> VerticalPolicy {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn valid_config_parses_durations() {
        let v = validate(&config(Some(horizontal(1, 5)), Some(vertical()))).unwrap();
        assert_eq!(v.stabilization_window, Duration::from_secs(300));
        assert_eq!(v.lookback, Duration::from_secs(86_400));
        assert_eq!(v.half_life, Duration::from_secs(86_400));
    }

    #[test]
    fn min_above_max_replicas_is_invalid() {
        let err = validate(&config(Some(horizontal(6, 5)), None)).unwrap_err();
        assert!(matches!(err, AutoscaleError::ConfigInvalid { .. }));
    }

    #[test]
    fn zero_min_replicas_is_allowed() {
        assert!(validate(&config(Some(horizontal(0, 3)), None)).is_ok());
    }

    #[test]
    fn utilization_on_custom_metric_is_invalid() {
        let mut h = horizontal(1, 5);
        h.metrics[0].name = "rps".to_string();
        assert!(validate(&config(Some(h), None)).is_err());
    }

    #[test]
    fn non_positive_target_is_invalid() {
        let mut h = horizontal(1, 5);
        h.metrics[0].target_value = 0.0;
        assert!(validate(&config(Some(h.clone()), None)).is_err());
        h.metrics[0].target_value = f64::NAN;
        assert!(validate(&config(Some(h), None)).is_err());
    }

    #[test]
    fn container_bounds_min_above_max_is_invalid() {
        let mut v = vertical();
        v.container_policies.push(ContainerResourcePolicy {
            container_name: "app".to_string(),
            min_allowed: Resources::new(100, 512),
            max_allowed: Resources::new(200, 256),
        });
        let err = validate(&config(None, Some(v))).unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn bad_duration_is_invalid() {
        let mut h = horizontal(1, 5);
        h.stabilization_window = "soon".to_string();
        assert!(validate(&config(Some(h), None)).is_err());
    }

    #[test]
    fn vertical_only_uses_default_window() {
        let v = validate(&config(None, Some(vertical()))).unwrap();
        assert_eq!(v.stabilization_window, DEFAULT_STABILIZATION_WINDOW);
    }

    #[test]
    fn empty_policy_is_invalid() {
        assert!(validate(&config(None, None)).is_err());
    }
}
