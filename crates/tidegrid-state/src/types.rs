//! Domain types for the TideGrid autoscaler.
//!
//! These types describe scaling targets and their policies, the workload
//! state reported by the workload controller, usage samples, vertical
//! recommendations, and per-tick decision events. All types serialize
//! to/from JSON for storage in redb tables and for the REST API.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a scaling target: `{namespace}/{kind}/{name}`.
pub type TargetId = String;

/// Identifier for one running instance of a workload.
pub type InstanceId = String;

// ── Target ─────────────────────────────────────────────────────────

/// The workload group being autoscaled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScalingTarget {
    /// Workload kind, e.g. "deployment".
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ScalingTarget {
    pub fn new(namespace: &str, kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Build the target id used as the store key and loop identity.
    pub fn id(&self) -> TargetId {
        format!("{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

// ── Resources ──────────────────────────────────────────────────────

/// A resource dimension managed by the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceName {
    Cpu,
    Memory,
}

impl ResourceName {
    pub const ALL: [ResourceName; 2] = [ResourceName::Cpu, ResourceName::Memory];

    /// Metric name under which the metrics provider reports this resource.
    pub fn metric_name(self) -> &'static str {
        match self {
            ResourceName::Cpu => "cpu",
            ResourceName::Memory => "memory",
        }
    }

    /// Map a metric name back to a resource, if it is one.
    pub fn from_metric_name(name: &str) -> Option<Self> {
        match name {
            "cpu" => Some(ResourceName::Cpu),
            "memory" => Some(ResourceName::Memory),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric_name())
    }
}

/// Per-container allocation (or usage) for both managed resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resources {
    /// CPU in millicores.
    pub cpu_millicores: u64,
    /// Memory in bytes.
    pub memory_bytes: u64,
}

impl Resources {
    pub fn new(cpu_millicores: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    pub fn get(&self, resource: ResourceName) -> u64 {
        match resource {
            ResourceName::Cpu => self.cpu_millicores,
            ResourceName::Memory => self.memory_bytes,
        }
    }

    pub fn set(&mut self, resource: ResourceName, value: u64) {
        match resource {
            ResourceName::Cpu => self.cpu_millicores = value,
            ResourceName::Memory => self.memory_bytes = value,
        }
    }

    /// Upper bound used for containers without a resource policy.
    pub fn unbounded() -> Self {
        Self::new(u64::MAX, u64::MAX)
    }
}

/// A named container together with its resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerResources {
    pub name: String,
    pub resources: Resources,
}

// ── Horizontal policy ──────────────────────────────────────────────

/// Replica bounds and the metrics that drive the horizontal axis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HorizontalPolicy {
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Evaluated in order; the most demanding metric wins.
    pub metrics: Vec<MetricSpec>,
    /// How long a lower replica count must persist before scaling down (e.g. "5m").
    #[serde(default = "default_stabilization_window")]
    pub stabilization_window: String,
}

/// One metric the horizontal axis scales on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSpec {
    /// "cpu", "memory", or a custom per-instance metric such as "rps".
    pub name: String,
    pub target_value: f64,
    pub target_type: MetricTargetType,
}

/// How `MetricSpec.target_value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricTargetType {
    /// Percentage of the per-instance allocation (cpu/memory only).
    Utilization,
    /// Raw per-instance average in the metric's own unit.
    AverageValue,
}

fn default_stabilization_window() -> String {
    "5m".to_string()
}

// ── Vertical policy ────────────────────────────────────────────────

/// How vertical recommendations may be applied to a running workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Compute and expose recommendations only.
    Off,
    /// Apply once, when a container is first observed.
    Initial,
    /// Apply by evicting instances so they are recreated.
    Recreate,
    /// Resize in place where allowed, recreate otherwise.
    #[default]
    Auto,
}

/// Per-container resource bounds and the recommender's tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerticalPolicy {
    #[serde(default)]
    pub update_mode: UpdateMode,
    #[serde(default)]
    pub container_policies: Vec<ContainerResourcePolicy>,
    /// History interval the recommender reads (e.g. "24h").
    #[serde(default = "default_lookback")]
    pub lookback: String,
    /// Age at which a sample weighs half as much as a fresh one.
    #[serde(default = "default_half_life")]
    pub half_life: String,
    /// Multiplier applied to peak usage for the upper bound.
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,
    /// Changes smaller than this (relative to the current allocation) are ignored.
    #[serde(default = "default_min_change_percent")]
    pub min_change_percent: f64,
    /// Dampen downward resource changes over the stabilization window.
    #[serde(default = "default_true")]
    pub stabilize: bool,
}

impl VerticalPolicy {
    /// Bounds for a container: its own policy, else the `"*"` policy, else unbounded.
    pub fn bounds_for(&self, container_name: &str) -> (Resources, Resources) {
        self.container_policies
            .iter()
            .find(|p| p.container_name == container_name)
            .or_else(|| {
                self.container_policies
                    .iter()
                    .find(|p| p.container_name == "*")
            })
            .map(|p| (p.min_allowed, p.max_allowed))
            .unwrap_or((Resources::default(), Resources::unbounded()))
    }
}

/// Allowed range of a container's resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerResourcePolicy {
    /// Container name, or `"*"` for every container without its own entry.
    pub container_name: String,
    pub min_allowed: Resources,
    pub max_allowed: Resources,
}

fn default_lookback() -> String {
    "24h".to_string()
}

fn default_half_life() -> String {
    "24h".to_string()
}

fn default_safety_factor() -> f64 {
    1.15
}

fn default_min_change_percent() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

// ── Resize policy ──────────────────────────────────────────────────

/// Whether changing a resource requires restarting the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    NotRequired,
    RestartContainer,
}

/// Owner-declared restart requirement for one container resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResizePolicy {
    pub container_name: String,
    pub resource: ResourceName,
    pub restart_policy: RestartPolicy,
}

// ── Target config ──────────────────────────────────────────────────

/// Everything the configuration source holds for one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    pub target: ScalingTarget,
    #[serde(default)]
    pub horizontal: Option<HorizontalPolicy>,
    #[serde(default)]
    pub vertical: Option<VerticalPolicy>,
    #[serde(default)]
    pub resize_policies: Vec<ResizePolicy>,
}

impl TargetConfig {
    pub fn id(&self) -> TargetId {
        self.target.id()
    }

    /// Restart policy for a container resource. Undeclared means `NotRequired`.
    pub fn restart_policy(&self, container_name: &str, resource: ResourceName) -> RestartPolicy {
        self.resize_policies
            .iter()
            .find(|p| p.container_name == container_name && p.resource == resource)
            .map(|p| p.restart_policy)
            .unwrap_or_default()
    }
}

// ── Workload state ─────────────────────────────────────────────────

/// Live state of a target as reported by the workload controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadState {
    pub target_id: TargetId,
    /// Declared replica count.
    pub replicas: u32,
    /// Declared per-container allocation that new instances receive.
    pub containers: Vec<ContainerResources>,
    /// Running instances.
    pub instances: Vec<InstanceState>,
    /// Whether the controller can resize containers without a restart.
    #[serde(default = "default_true")]
    pub in_place_resize: bool,
}

impl WorkloadState {
    /// Declared allocation for a container.
    pub fn container(&self, name: &str) -> Option<&Resources> {
        self.containers
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.resources)
    }

    /// Highest observed usage of a container resource across instances.
    pub fn observed_usage(&self, container_name: &str, resource: ResourceName) -> u64 {
        self.instances
            .iter()
            .flat_map(|i| i.containers.iter())
            .filter(|c| c.name == container_name)
            .map(|c| c.usage.get(resource))
            .max()
            .unwrap_or(0)
    }
}

/// One running instance of the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceState {
    pub id: InstanceId,
    /// Unix timestamp (seconds) when this instance was created.
    pub created_at: u64,
    pub containers: Vec<ContainerStatus>,
}

impl InstanceState {
    pub fn container(&self, name: &str) -> Option<&ContainerStatus> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Allocation and current usage of one container in one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerStatus {
    pub name: String,
    pub resources: Resources,
    /// Current usage (CPU millicores, memory working set).
    #[serde(default)]
    pub usage: Resources,
}

// ── Samples ────────────────────────────────────────────────────────

/// A raw usage data point from the metrics provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageSample {
    pub instance_id: InstanceId,
    pub container_name: String,
    pub value: f64,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

/// Per-instance values of one metric for one target, as used by the
/// horizontal engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub target_id: TargetId,
    pub metric_name: String,
    /// One value per reporting instance.
    pub per_instance_values: Vec<f64>,
    /// Instances that exist but did not report.
    pub missing_instances: u32,
    pub timestamp: u64,
}

impl MetricSample {
    /// Mean over reporting instances, `None` if nothing reported.
    pub fn average(&self) -> Option<f64> {
        if self.per_instance_values.is_empty() {
            return None;
        }
        let sum: f64 = self.per_instance_values.iter().sum();
        Some(sum / self.per_instance_values.len() as f64)
    }
}

// ── Recommendations & decisions ────────────────────────────────────

/// Vertical recommendation for one container resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recommendation {
    pub container_name: String,
    pub resource: ResourceName,
    pub lower_bound: u64,
    pub target: u64,
    pub upper_bound: u64,
}

/// One tick's desired shape, kept by the stabilization tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub target_id: TargetId,
    pub timestamp: u64,
    pub desired_replicas: Option<u32>,
    pub desired_resources: Option<Vec<ContainerResources>>,
}

/// Inputs and result of one horizontal metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRatio {
    pub name: String,
    pub average: f64,
    pub target_value: f64,
    pub ratio: f64,
    pub desired: u32,
}

/// What happened to a decision at the actuation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Actuation {
    /// Live state already matches; nothing issued.
    NoOp,
    /// Mutation issued and acknowledged.
    Applied,
    /// Recommendation exposed only (update mode or admission-time apply).
    Observed,
    /// Held back until a precondition holds; rechecked next tick.
    Deferred { reason: String },
    /// Withheld by the conflict guard.
    Suppressed { reason: String },
    /// The controller call errored or timed out.
    Failed { error: String },
}

/// Kind of vertical mutation planned for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalActionKind {
    Observe,
    ResizeInPlace,
    Evict,
}

/// Result of the horizontal axis for one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HorizontalOutcome {
    pub candidate: u32,
    pub stabilized: u32,
    pub actuation: Actuation,
}

/// Result of one vertical action for one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerticalOutcome {
    pub container_name: String,
    pub kind: VerticalActionKind,
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    #[serde(default)]
    pub resources: Option<Resources>,
    pub actuation: Actuation,
}

/// The conflict guard's verdict for one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConflictReport {
    /// Resources both axes act on.
    pub overlap: Vec<ResourceName>,
    /// Whether vertical actuation was withheld this tick.
    pub vertical_suppressed: bool,
}

/// One structured record per tick per target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionEvent {
    pub target_id: TargetId,
    pub timestamp: u64,
    #[serde(default)]
    pub current_replicas: Option<u32>,
    #[serde(default)]
    pub metrics: Vec<MetricRatio>,
    #[serde(default)]
    pub horizontal: Option<HorizontalOutcome>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    /// Stabilized allocation the vertical axis converges instances to.
    /// New instances are admitted with it.
    #[serde(default)]
    pub desired_resources: Vec<ContainerResources>,
    #[serde(default)]
    pub vertical: Vec<VerticalOutcome>,
    #[serde(default)]
    pub conflict: ConflictReport,
    /// Set when the tick ended early (metrics unavailable, invalid config, ...).
    #[serde(default)]
    pub error: Option<String>,
}

impl DecisionEvent {
    /// An event with no decisions yet.
    pub fn empty(target_id: &str, timestamp: u64) -> Self {
        Self {
            target_id: target_id.to_string(),
            timestamp,
            current_replicas: None,
            metrics: Vec::new(),
            horizontal: None,
            recommendations: Vec::new(),
            desired_resources: Vec::new(),
            vertical: Vec::new(),
            conflict: ConflictReport::default(),
            error: None,
        }
    }

    /// Build the composite key for the decisions table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.target_id, self.timestamp)
    }

    /// Whether any mutation was acknowledged by the controller this tick.
    pub fn mutated(&self) -> bool {
        self.horizontal
            .as_ref()
            .is_some_and(|h| h.actuation == Actuation::Applied)
            || self.vertical.iter().any(|v| v.actuation == Actuation::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertical(policies: Vec<ContainerResourcePolicy>) -> VerticalPolicy {
        VerticalPolicy {
            update_mode: UpdateMode::Auto,
            container_policies: policies,
            lookback: "24h".to_string(),
            half_life: "24h".to_string(),
            safety_factor: 1.15,
            min_change_percent: 10.0,
            stabilize: true,
        }
    }

    #[test]
    fn target_id_format() {
        let target = ScalingTarget::new("prod", "deployment", "api");
        assert_eq!(target.id(), "prod/deployment/api");
    }

    #[test]
    fn bounds_prefer_named_policy_over_wildcard() {
        let policy = vertical(vec![
            ContainerResourcePolicy {
                container_name: "*".to_string(),
                min_allowed: Resources::new(10, 10),
                max_allowed: Resources::new(100, 100),
            },
            ContainerResourcePolicy {
                container_name: "app".to_string(),
                min_allowed: Resources::new(50, 50),
                max_allowed: Resources::new(500, 500),
            },
        ]);

        assert_eq!(policy.bounds_for("app").1, Resources::new(500, 500));
        assert_eq!(policy.bounds_for("sidecar").1, Resources::new(100, 100));
    }

    #[test]
    fn bounds_default_to_unbounded() {
        let policy = vertical(Vec::new());
        let (min, max) = policy.bounds_for("app");
        assert_eq!(min, Resources::default());
        assert_eq!(max, Resources::unbounded());
    }

    #[test]
    fn undeclared_resize_policy_is_not_required() {
        let config = TargetConfig {
            target: ScalingTarget::new("default", "deployment", "api"),
            horizontal: None,
            vertical: None,
            resize_policies: vec![ResizePolicy {
                container_name: "app".to_string(),
                resource: ResourceName::Memory,
                restart_policy: RestartPolicy::RestartContainer,
            }],
        };

        assert_eq!(
            config.restart_policy("app", ResourceName::Memory),
            RestartPolicy::RestartContainer
        );
        assert_eq!(
            config.restart_policy("app", ResourceName::Cpu),
            RestartPolicy::NotRequired
        );
    }

    #[test]
    fn observed_usage_takes_max_across_instances() {
        let status = |usage| ContainerStatus {
            name: "app".to_string(),
            resources: Resources::new(500, 512),
            usage: Resources::new(100, usage),
        };
        let state = WorkloadState {
            target_id: "default/deployment/api".to_string(),
            replicas: 2,
            containers: Vec::new(),
            instances: vec![
                InstanceState {
                    id: "i-0".to_string(),
                    created_at: 0,
                    containers: vec![status(200)],
                },
                InstanceState {
                    id: "i-1".to_string(),
                    created_at: 0,
                    containers: vec![status(300)],
                },
            ],
            in_place_resize: true,
        };

        assert_eq!(state.observed_usage("app", ResourceName::Memory), 300);
        assert_eq!(state.observed_usage("other", ResourceName::Memory), 0);
    }

    #[test]
    fn metric_sample_average() {
        let mut sample = MetricSample {
            target_id: "t".to_string(),
            metric_name: "cpu".to_string(),
            per_instance_values: vec![10.0, 20.0, 30.0],
            missing_instances: 0,
            timestamp: 0,
        };
        assert_eq!(sample.average(), Some(20.0));

        sample.per_instance_values.clear();
        assert_eq!(sample.average(), None);
    }

    #[test]
    fn vertical_policy_defaults_from_json() {
        let policy: VerticalPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.update_mode, UpdateMode::Auto);
        assert_eq!(policy.lookback, "24h");
        assert_eq!(policy.min_change_percent, 10.0);
        assert!(policy.stabilize);
    }

    #[test]
    fn actuation_serializes_with_status_tag() {
        let json = serde_json::to_value(Actuation::Deferred {
            reason: "usage".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "deferred");
        assert_eq!(json["reason"], "usage");
    }
}
