//! Background environment snapshots.
//!
//! A scheduler polls every endpoint at the configured interval through a
//! bounded worker pool; per-endpoint results feed back over a channel so
//! status writes are serialised. Partial failures never abort a sweep: a
//! failing endpoint is marked down with an error summary and retried on the
//! next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::persistence::{
    DockerSnapshot, Endpoint, EndpointId, EndpointStatus, KubernetesSnapshot,
};

#[derive(Debug, Default)]
pub struct SnapshotReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub enum SnapshotData {
    Docker(DockerSnapshot),
    Kubernetes(KubernetesSnapshot),
}

pub async fn snapshot_loop(state: AppState) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.config.snapshots.interval_secs));

    loop {
        interval.tick().await;
        match snapshot_all(&state).await {
            Ok(report) => debug!(
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                "snapshot sweep finished"
            ),
            Err(err) => warn!(?err, "snapshot sweep failed"),
        }
    }
}

/// Snapshots every endpoint, bounded by the configured worker count.
pub async fn snapshot_all(state: &AppState) -> anyhow::Result<SnapshotReport> {
    let endpoints = state.services.endpoints.read_all()?;
    let permits = Arc::new(Semaphore::new(state.config.snapshots.workers));
    let (tx, mut rx) = mpsc::channel(endpoints.len().max(1));

    let mut report = SnapshotReport::default();
    let mut spawned = 0usize;
    for endpoint in endpoints {
        let base_url = match resolve_base_url(state, &endpoint).await {
            Some(url) => url,
            None => {
                // Edge endpoint without an established tunnel; the agent
                // pushes its own state, nothing to poll.
                report.skipped += 1;
                continue;
            }
        };

        let permits = permits.clone();
        let tx = tx.clone();
        let client = state.http_client.clone();
        spawned += 1;
        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.expect("semaphore closed");
            let result = snapshot_endpoint(&client, &endpoint, &base_url).await;
            let _ = tx.send((endpoint.id, result)).await;
        });
    }
    drop(tx);

    for _ in 0..spawned {
        let Some((endpoint_id, result)) = rx.recv().await else {
            break;
        };
        match result {
            Ok(data) => {
                record_success(state, endpoint_id, data)?;
                report.succeeded += 1;
                counter!("snapshots_total", "outcome" => "success").increment(1);
            }
            Err(err) => {
                warn!(endpoint = %endpoint_id, %err, "snapshot failed");
                record_failure(state, endpoint_id, &err.to_string())?;
                report.failed += 1;
                counter!("snapshots_total", "outcome" => "failure").increment(1);
            }
        }
    }

    Ok(report)
}

async fn resolve_base_url(state: &AppState, endpoint: &Endpoint) -> Option<String> {
    if endpoint.kind.is_edge() {
        return state.tunnels.api_base_url(endpoint.id).await.ok();
    }
    if endpoint.url.is_empty() {
        return None;
    }
    Some(endpoint.url.trim_end_matches('/').to_string())
}

pub async fn snapshot_endpoint(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    base_url: &str,
) -> anyhow::Result<SnapshotData> {
    if endpoint.kind.is_kubernetes() {
        snapshot_kubernetes(client, base_url).await.map(SnapshotData::Kubernetes)
    } else {
        snapshot_docker(client, base_url).await.map(SnapshotData::Docker)
    }
}

async fn snapshot_docker(client: &reqwest::Client, base_url: &str) -> anyhow::Result<DockerSnapshot> {
    let info: Value = get_json(client, &format!("{base_url}/info")).await?;
    let version: Value = get_json(client, &format!("{base_url}/version")).await?;
    let volumes: Value = get_json(client, &format!("{base_url}/volumes")).await?;

    let swarm_nodes = info
        .pointer("/Swarm/Nodes")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Ok(DockerSnapshot {
        time: Utc::now(),
        docker_version: version
            .get("Version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        swarm: info
            .pointer("/Swarm/ControlAvailable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        total_cpu: info.get("NCPU").and_then(Value::as_u64).unwrap_or(0),
        total_memory: info.get("MemTotal").and_then(Value::as_u64).unwrap_or(0),
        running_container_count: info
            .get("ContainersRunning")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        stopped_container_count: info
            .get("ContainersStopped")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        volume_count: volumes
            .get("Volumes")
            .and_then(Value::as_array)
            .map(|list| list.len() as u64)
            .unwrap_or(0),
        image_count: info.get("Images").and_then(Value::as_u64).unwrap_or(0),
        node_count: swarm_nodes,
    })
}

async fn snapshot_kubernetes(
    client: &reqwest::Client,
    base_url: &str,
) -> anyhow::Result<KubernetesSnapshot> {
    let version: Value = get_json(client, &format!("{base_url}/version")).await?;
    let nodes: Value = get_json(client, &format!("{base_url}/api/v1/nodes")).await?;

    let mut node_count = 0;
    let mut total_cpu = 0;
    let mut total_memory = 0;
    if let Some(items) = nodes.get("items").and_then(Value::as_array) {
        node_count = items.len() as u64;
        for item in items {
            if let Some(cpu) = item
                .pointer("/status/capacity/cpu")
                .and_then(Value::as_str)
            {
                total_cpu += parse_cpu(cpu);
            }
            if let Some(memory) = item
                .pointer("/status/capacity/memory")
                .and_then(Value::as_str)
            {
                total_memory += parse_quantity(memory);
            }
        }
    }

    Ok(KubernetesSnapshot {
        time: Utc::now(),
        kubernetes_version: version
            .get("gitVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        node_count,
        total_cpu,
        total_memory,
    })
}

async fn get_json(client: &reqwest::Client, url: &str) -> anyhow::Result<Value> {
    Ok(client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?)
}

/// Parses a Kubernetes CPU quantity into whole cores, rounding millicores up.
fn parse_cpu(quantity: &str) -> u64 {
    if let Some(millis) = quantity.strip_suffix('m') {
        let millis: u64 = millis.parse().unwrap_or(0);
        return millis.div_ceil(1000);
    }
    quantity.parse().unwrap_or(0)
}

/// Parses a Kubernetes memory quantity into bytes.
fn parse_quantity(quantity: &str) -> u64 {
    const UNITS: [(&str, u64); 6] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
    ];
    for (suffix, factor) in UNITS {
        if let Some(value) = quantity.strip_suffix(suffix) {
            return value.parse::<u64>().unwrap_or(0).saturating_mul(factor);
        }
    }
    quantity.parse().unwrap_or(0)
}

fn record_success(
    state: &AppState,
    endpoint_id: EndpointId,
    data: SnapshotData,
) -> anyhow::Result<()> {
    let mut endpoint = state.services.endpoints.read(endpoint_id.0)?;
    endpoint.status = EndpointStatus::Up;
    endpoint.snapshot_error = None;
    match data {
        SnapshotData::Docker(snapshot) => endpoint.docker_snapshot = Some(snapshot),
        SnapshotData::Kubernetes(snapshot) => endpoint.kubernetes_snapshot = Some(snapshot),
    }
    state.services.endpoints.update(endpoint_id.0, &endpoint)?;
    Ok(())
}

fn record_failure(state: &AppState, endpoint_id: EndpointId, error: &str) -> anyhow::Result<()> {
    let mut endpoint = state.services.endpoints.read(endpoint_id.0)?;
    endpoint.status = EndpointStatus::Down;
    endpoint.snapshot_error = Some(error.to_string());
    state.services.endpoints.update(endpoint_id.0, &endpoint)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_support::test_state;
    use crate::persistence::endpoints::test_endpoint;
    use crate::persistence::EndpointType;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn cpu_and_memory_quantities_parse() {
        assert_eq!(parse_cpu("4"), 4);
        assert_eq!(parse_cpu("1500m"), 2);
        assert_eq!(parse_quantity("16Gi"), 16 * (1 << 30));
        assert_eq!(parse_quantity("512Mi"), 512 * (1 << 20));
        assert_eq!(parse_quantity("1024"), 1024);
    }

    #[tokio::test]
    async fn sweep_records_success_and_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/info");
                then.status(200).json_body(json!({
                    "NCPU": 8,
                    "MemTotal": 16_000_000_000u64,
                    "ContainersRunning": 3,
                    "ContainersStopped": 1,
                    "Images": 12,
                    "Swarm": {"ControlAvailable": false, "Nodes": 0}
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/version");
                then.status(200).json_body(json!({"Version": "27.0.1"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/volumes");
                then.status(200).json_body(json!({"Volumes": [{}, {}]}));
            })
            .await;

        let (_dir, state) = test_state();

        let mut healthy = test_endpoint(0, EndpointType::Docker);
        healthy.url = server.base_url();
        state
            .services
            .endpoints
            .create(&mut healthy)
            .expect("create healthy");

        let mut unreachable = test_endpoint(0, EndpointType::Docker);
        unreachable.url = "http://127.0.0.1:9".into();
        state
            .services
            .endpoints
            .create(&mut unreachable)
            .expect("create unreachable");

        let report = snapshot_all(&state).await.expect("sweep");
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);

        let healthy = state
            .services
            .endpoints
            .read(healthy.id.0)
            .expect("read healthy");
        assert_eq!(healthy.status, EndpointStatus::Up);
        let snapshot = healthy.docker_snapshot.expect("snapshot stored");
        assert_eq!(snapshot.docker_version, "27.0.1");
        assert_eq!(snapshot.running_container_count, 3);
        assert_eq!(snapshot.volume_count, 2);

        let unreachable = state
            .services
            .endpoints
            .read(unreachable.id.0)
            .expect("read unreachable");
        assert_eq!(unreachable.status, EndpointStatus::Down);
        assert!(unreachable.snapshot_error.is_some());
    }

    #[tokio::test]
    async fn edge_endpoints_without_a_tunnel_are_skipped() {
        let (_dir, state) = test_state();
        let mut edge = test_endpoint(0, EndpointType::EdgeAgentOnDocker);
        edge.status = EndpointStatus::Up;
        state
            .services
            .endpoints
            .create(&mut edge)
            .expect("create edge");

        let report = snapshot_all(&state).await.expect("sweep");
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        let edge = state.services.endpoints.read(edge.id.0).expect("read");
        assert_eq!(edge.status, EndpointStatus::Up, "skipping must not flip status");
    }
}
