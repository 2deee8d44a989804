//! tidegrid.toml configuration parser.
//!
//! ```toml
//! [autoscaler]
//! tick_interval = "15s"
//! call_timeout = "5s"
//!
//! [[targets]]
//! target = { namespace = "default", kind = "deployment", name = "api" }
//! horizontal = { min_replicas = 1, max_replicas = 10, metrics = [
//!     { name = "cpu", target_value = 60.0, target_type = "utilization" },
//! ] }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use tidegrid_autoscale::{ReconcilerSettings, SupervisorConfig, validate};
use tidegrid_state::{TargetConfig, parse_duration};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub autoscaler: AutoscalerConfig,
    /// Target configs written to the store at startup.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    pub tick_interval: String,
    pub call_timeout: String,
    pub discovery_interval: String,
    pub invalid_config_backoff_max: String,
    /// How long pushed usage samples are kept.
    pub usage_retention: String,
    /// Window the sampler reads current horizontal metrics from.
    pub metric_window: String,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            tick_interval: "15s".to_string(),
            call_timeout: "5s".to_string(),
            discovery_interval: "30s".to_string(),
            invalid_config_backoff_max: "5m".to_string(),
            usage_retention: "24h".to_string(),
            metric_window: "1m".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("config {}", path.display()))
    }

    /// Parse and check a config document.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.supervisor_config()?;
        config.usage_retention()?;
        for target in &config.targets {
            validate(target).with_context(|| format!("seed target {}", target.id()))?;
        }
        Ok(config)
    }

    /// Loop timing derived from the `[autoscaler]` section.
    pub fn supervisor_config(&self) -> anyhow::Result<SupervisorConfig> {
        let a = &self.autoscaler;
        let tick_interval = positive("tick_interval", &a.tick_interval)?;
        let call_timeout = positive("call_timeout", &a.call_timeout)?;
        if call_timeout >= tick_interval {
            bail!("call_timeout ({call_timeout:?}) must be shorter than tick_interval ({tick_interval:?})");
        }
        Ok(SupervisorConfig {
            tick_interval,
            discovery_interval: positive("discovery_interval", &a.discovery_interval)?,
            invalid_config_backoff_max: positive(
                "invalid_config_backoff_max",
                &a.invalid_config_backoff_max,
            )?,
            reconciler: ReconcilerSettings {
                call_timeout,
                metric_window: positive("metric_window", &a.metric_window)?,
            },
        })
    }

    pub fn usage_retention(&self) -> anyhow::Result<Duration> {
        positive("usage_retention", &self.autoscaler.usage_retention)
    }
}

fn positive(field: &str, value: &str) -> anyhow::Result<Duration> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        Some(_) => bail!("{field} must be greater than zero"),
        None => bail!("{field}: unparsable duration {value:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidegrid_state::UpdateMode;

    #[test]
    fn empty_document_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        let sup = config.supervisor_config().unwrap();
        assert_eq!(sup.tick_interval, Duration::from_secs(15));
        assert_eq!(sup.reconciler.call_timeout, Duration::from_secs(5));
        assert_eq!(sup.invalid_config_backoff_max, Duration::from_secs(300));
        assert_eq!(config.usage_retention().unwrap(), Duration::from_secs(86_400));
        assert!(config.targets.is_empty());
    }

    #[test]
    fn parses_seed_targets() {
        let toml_str = r#"
[autoscaler]
tick_interval = "30s"

[[targets]]
target = { namespace = "default", kind = "deployment", name = "api" }

[targets.horizontal]
min_replicas = 2
max_replicas = 8
metrics = [{ name = "cpu", target_value = 60.0, target_type = "utilization" }]

[targets.vertical]
update_mode = "recreate"
"#;
        let config = DaemonConfig::parse(toml_str).unwrap();
        assert_eq!(
            config.supervisor_config().unwrap().tick_interval,
            Duration::from_secs(30)
        );
        let target = &config.targets[0];
        assert_eq!(target.id(), "default/deployment/api");
        assert_eq!(target.horizontal.as_ref().unwrap().max_replicas, 8);
        assert_eq!(
            target.vertical.as_ref().unwrap().update_mode,
            UpdateMode::Recreate
        );
    }

    #[test]
    fn call_timeout_must_fit_in_tick() {
        let err = DaemonConfig::parse(
            r#"
[autoscaler]
tick_interval = "5s"
call_timeout = "5s"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("call_timeout"));
    }

    #[test]
    fn invalid_seed_target_is_rejected() {
        let toml_str = r#"
[[targets]]
target = { namespace = "default", kind = "deployment", name = "api" }

[targets.horizontal]
min_replicas = 9
max_replicas = 3
metrics = [{ name = "rps", target_value = 100.0, target_type = "average_value" }]
"#;
        let err = DaemonConfig::parse(toml_str).unwrap_err();
        assert!(format!("{err:#}").contains("default/deployment/api"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = DaemonConfig::parse("[autoscaler]\ndiscovery_interval = \"0s\"\n").unwrap_err();
        assert!(err.to_string().contains("discovery_interval"));
    }
}
