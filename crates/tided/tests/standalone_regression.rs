//! Standalone regression tests.
//!
//! Wires the store, usage provider, standalone controller, supervisor, and
//! API router together in-process and drives them over HTTP.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use tidegrid_api::build_router;
use tidegrid_autoscale::{validate, Reconciler, ReconcilerSettings, Supervisor, SupervisorConfig};
use tidegrid_metrics::{InMemoryUsageProvider, MetricSampler};
use tidegrid_state::*;
use tided::{DaemonConfig, StoreController};

const ID: &str = "default/deployment/api";
const BASE: &str = "/api/v1/targets/default/deployment/api";

struct Stack {
    router: Router,
    store: StateStore,
    supervisor: Supervisor,
}

fn stack(store: StateStore) -> Stack {
    let usage = InMemoryUsageProvider::new(Duration::from_secs(3600));
    let supervisor = Supervisor::new(
        Arc::new(store.clone()),
        Arc::new(StoreController::new(store.clone())),
        Arc::new(usage.clone()),
        Arc::new(store.clone()),
        SupervisorConfig {
            tick_interval: Duration::from_millis(30),
            discovery_interval: Duration::from_millis(30),
            invalid_config_backoff_max: Duration::from_millis(120),
            reconciler: ReconcilerSettings {
                call_timeout: Duration::from_secs(1),
                metric_window: Duration::from_secs(60),
            },
        },
    );
    Stack {
        router: build_router(store.clone(), usage),
        store,
        supervisor,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: serde_json::Value) -> StatusCode {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    router.clone().oneshot(req).await.unwrap().status()
}

async fn get_json(router: &Router, uri: &str) -> serde_json::Value {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK, "GET {uri}");
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn workload_body(replicas: u32) -> serde_json::Value {
    let instances: Vec<_> = (0..replicas)
        .map(|i| {
            serde_json::json!({
                "id": format!("i-{i}"),
                "created_at": 1000 + i,
                "containers": [{
                    "name": "app",
                    "resources": { "cpu_millicores": 250, "memory_bytes": 268435456 }
                }]
            })
        })
        .collect();
    serde_json::json!({
        "target_id": ID,
        "replicas": replicas,
        "containers": [{
            "name": "app",
            "resources": { "cpu_millicores": 250, "memory_bytes": 268435456 }
        }],
        "instances": instances
    })
}

fn rps_target(max: u32) -> serde_json::Value {
    serde_json::json!({
        "target": { "namespace": "default", "kind": "deployment", "name": "api" },
        "horizontal": {
            "min_replicas": 1,
            "max_replicas": max,
            "metrics": [{ "name": "rps", "target_value": 100.0, "target_type": "average_value" }]
        }
    })
}

#[tokio::test]
async fn standalone_scales_out_from_pushed_usage() {
    let s = stack(StateStore::open_in_memory().unwrap());

    assert_eq!(send(&s.router, "PUT", &format!("{BASE}/workload"), workload_body(2)).await, StatusCode::OK);
    assert_eq!(send(&s.router, "POST", "/api/v1/targets", rps_target(6)).await, StatusCode::CREATED);
    let usage = serde_json::json!({
        "metric": "rps",
        "samples": [
            { "instance_id": "i-0", "container_name": "app", "value": 300.0 },
            { "instance_id": "i-1", "container_name": "app", "value": 300.0 }
        ]
    });
    assert_eq!(send(&s.router, "POST", &format!("{BASE}/usage"), usage).await, StatusCode::ACCEPTED);

    s.supervisor.sync().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    s.supervisor.stop_all().await;

    // ceil(2 * 3.0) = 6, within max.
    let workload = get_json(&s.router, &format!("{BASE}/workload")).await;
    assert_eq!(workload["data"]["replicas"], 6);
    assert_eq!(workload["data"]["instances"].as_array().unwrap().len(), 6);

    let decisions = get_json(&s.router, &format!("{BASE}/decisions?limit=50")).await;
    let events = decisions["data"].as_array().unwrap();
    assert!(!events.is_empty());
    assert!(events.iter().any(|e| e["horizontal"]["actuation"]["status"] == "applied"));

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = s.router.clone().oneshot(req).await.unwrap();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tidegrid_current_replicas{target=\"default/deployment/api\"}"), "{text}");
}

#[tokio::test]
async fn standalone_without_usage_holds_replicas() {
    let s = stack(StateStore::open_in_memory().unwrap());
    send(&s.router, "PUT", &format!("{BASE}/workload"), workload_body(3)).await;
    send(&s.router, "POST", "/api/v1/targets", rps_target(10)).await;

    s.supervisor.sync().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    s.supervisor.stop_all().await;

    assert_eq!(s.store.get_workload(ID).unwrap().unwrap().replicas, 3);
    let latest = s.store.latest_decision(ID).unwrap().unwrap();
    assert!(latest.error.unwrap().contains("metrics unavailable"));
}

#[tokio::test]
async fn deleting_target_stops_its_loop() {
    let s = stack(StateStore::open_in_memory().unwrap());
    send(&s.router, "PUT", &format!("{BASE}/workload"), workload_body(1)).await;
    send(&s.router, "POST", "/api/v1/targets", rps_target(3)).await;

    s.supervisor.sync().await.unwrap();
    assert!(s.supervisor.is_running(ID).await);

    let req = Request::builder().method("DELETE").uri(BASE).body(Body::empty()).unwrap();
    assert_eq!(s.router.clone().oneshot(req).await.unwrap().status(), StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!s.supervisor.is_running(ID).await);
    s.supervisor.stop_all().await;
}

#[tokio::test]
async fn targets_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tidegrid.redb");

    {
        let s = stack(StateStore::open(&path).unwrap());
        send(&s.router, "POST", "/api/v1/targets", rps_target(4)).await;
    }

    let s = stack(StateStore::open(&path).unwrap());
    let listed = get_json(&s.router, "/api/v1/targets").await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    assert_eq!(listed["data"][0]["horizontal"]["max_replicas"], 4);
}

#[tokio::test]
async fn recreate_replaces_each_instance_once_within_window() {
    const MIB: u64 = 1024 * 1024;
    let store = StateStore::open_in_memory().unwrap();
    let usage = InMemoryUsageProvider::new(Duration::from_secs(86_400));
    let template = Resources::new(1000, 256 * MIB);
    store
        .put_workload(&WorkloadState {
            target_id: ID.to_string(),
            replicas: 2,
            containers: vec![ContainerResources {
                name: "app".to_string(),
                resources: template,
            }],
            instances: (0..2)
                .map(|i| InstanceState {
                    id: format!("i-{i}"),
                    created_at: 1000 + i,
                    containers: vec![ContainerStatus {
                        name: "app".to_string(),
                        resources: template,
                        usage: Resources::new(300, 600 * MIB),
                    }],
                })
                .collect(),
            in_place_resize: true,
        })
        .unwrap();
    let config = TargetConfig {
        target: ScalingTarget::new("default", "deployment", "api"),
        horizontal: None,
        vertical: Some(VerticalPolicy {
            update_mode: UpdateMode::Recreate,
            ..serde_json::from_str("{}").unwrap()
        }),
        resize_policies: Vec::new(),
    };
    store.put_target(&config).unwrap();

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    for (metric, value) in [("cpu", 300.0), ("memory", (600 * MIB) as f64)] {
        for i in 0..5 {
            for instance_id in ["i-0", "i-1"] {
                let sample = UsageSample {
                    instance_id: instance_id.to_string(),
                    container_name: "app".to_string(),
                    value,
                    timestamp: now - 600 + i * 60,
                };
                usage.record(ID, metric, sample).await;
            }
        }
    }

    let validated = validate(&config).unwrap();
    let sampler = MetricSampler::new(Arc::new(usage.clone()), Duration::from_secs(1));
    let mut reconciler = Reconciler::new(
        ID,
        Arc::new(StoreController::new(store.clone())),
        sampler,
        ReconcilerSettings::default(),
    );

    // 18 ticks, 270s: inside the 5m window.
    let mut evictions = 0;
    for i in 0..18 {
        let event = reconciler.tick(&validated, now + i * 15).await;
        evictions += event
            .vertical
            .iter()
            .filter(|v| v.kind == VerticalActionKind::Evict && v.actuation == Actuation::Applied)
            .count();
        store.put_decision(&event).unwrap();
    }

    assert_eq!(evictions, 2);
    let shape = store.latest_decision(ID).unwrap().unwrap().desired_resources[0].resources;
    // The CPU decrease is still held back by the window.
    assert_eq!(shape.cpu_millicores, 1000);
    let state = store.get_workload(ID).unwrap().unwrap();
    for instance in &state.instances {
        assert_ne!(instance.id, "i-0");
        assert_ne!(instance.id, "i-1");
        assert_eq!(instance.containers[0].resources, shape);
    }
}

#[test]
fn config_file_loads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[autoscaler]
tick_interval = "10s"
call_timeout = "2s"
usage_retention = "6h"

[[targets]]
target = {{ namespace = "default", kind = "deployment", name = "api" }}

[targets.vertical]
update_mode = "off"
"#
    )
    .unwrap();

    let config = DaemonConfig::from_file(file.path()).unwrap();
    let sup = config.supervisor_config().unwrap();
    assert_eq!(sup.tick_interval, Duration::from_secs(10));
    assert_eq!(sup.reconciler.call_timeout, Duration::from_secs(2));
    assert_eq!(config.usage_retention().unwrap(), Duration::from_secs(6 * 3600));
    assert_eq!(config.targets[0].id(), ID);
}
