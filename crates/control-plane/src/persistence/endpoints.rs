//! Environments ("endpoints") and their snapshot summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::{EndpointGroupId, EndpointId, TagId, TeamId, UserId};
use crate::store::{StoreError, TxRead};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    /// Docker engine reached directly over its API socket/TCP endpoint.
    Docker,
    /// Docker engine reached through a locally deployed agent.
    AgentOnDocker,
    /// Docker engine behind NAT, reached through a reverse tunnel.
    EdgeAgentOnDocker,
    /// Kubernetes API server reached directly.
    KubernetesLocal,
    /// Kubernetes reached through a locally deployed agent.
    AgentOnKubernetes,
    /// Kubernetes behind NAT, reached through a reverse tunnel.
    EdgeAgentOnKubernetes,
    /// Azure ACI environment.
    Azure,
}

impl EndpointType {
    pub fn is_edge(&self) -> bool {
        matches!(
            self,
            EndpointType::EdgeAgentOnDocker | EndpointType::EdgeAgentOnKubernetes
        )
    }

    pub fn is_kubernetes(&self) -> bool {
        matches!(
            self,
            EndpointType::KubernetesLocal
                | EndpointType::AgentOnKubernetes
                | EndpointType::EdgeAgentOnKubernetes
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Up,
    Down,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Up => "up",
            EndpointStatus::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEngine {
    #[default]
    Docker,
    Podman,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    pub enabled: bool,
    #[serde(default)]
    pub skip_verify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

/// Edge-specific knobs. Zero intervals inherit the stored settings default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EdgeSettings {
    #[serde(default)]
    pub checkin_interval: u64,
    #[serde(default)]
    pub snapshot_interval: u64,
    #[serde(default)]
    pub command_interval: u64,
    /// Async edge agents exchange state through snapshots instead of holding
    /// a long-poll open.
    #[serde(default)]
    pub async_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerSnapshot {
    pub time: DateTime<Utc>,
    pub docker_version: String,
    pub swarm: bool,
    pub total_cpu: u64,
    pub total_memory: u64,
    pub running_container_count: u64,
    pub stopped_container_count: u64,
    pub volume_count: u64,
    pub image_count: u64,
    pub node_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubernetesSnapshot {
    pub time: DateTime<Utc>,
    pub kubernetes_version: String,
    pub node_count: u64,
    pub total_cpu: u64,
    pub total_memory: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub kind: EndpointType,
    /// Base URL of the environment API; empty for edge endpoints until a
    /// tunnel is established.
    pub url: String,
    #[serde(default)]
    pub tls: TlsConfig,
    pub status: EndpointStatus,
    /// Set while an edge agent is actively checking in.
    #[serde(default)]
    pub heartbeat: bool,
    #[serde(default)]
    pub container_engine: ContainerEngine,
    pub group_id: EndpointGroupId,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// Users granted access to this environment directly.
    #[serde(default)]
    pub user_access_policies: Vec<UserId>,
    /// Teams granted access to this environment directly.
    #[serde(default)]
    pub team_access_policies: Vec<TeamId>,
    #[serde(default)]
    pub edge: EdgeSettings,
    /// Edge endpoints start untrusted and are excluded from dispatch until an
    /// administrator approves them.
    #[serde(default)]
    pub user_trusted: bool,
    /// Identifier the agent presents on every poll; empty for non-edge types.
    #[serde(default)]
    pub edge_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_snapshot: Option<DockerSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_snapshot: Option<KubernetesSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkin: Option<DateTime<Utc>>,
}

impl Endpoint {
    /// Whether `user`/`teams` inherited access through the endpoint's own
    /// policies or its group's.
    pub fn grants_access(&self, group: Option<&super::EndpointGroup>, user: UserId, teams: &[TeamId]) -> bool {
        if self.user_access_policies.contains(&user)
            || self.team_access_policies.iter().any(|team| teams.contains(team))
        {
            return true;
        }
        group.is_some_and(|group| {
            group.user_access_policies.contains(&user)
                || group.team_access_policies.iter().any(|team| teams.contains(team))
        })
    }
}

impl Entity for Endpoint {
    const BUCKET: &'static str = "endpoints";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = EndpointId(id);
    }
}

pub type EndpointService = Service<Endpoint>;

impl Service<Endpoint> {
    /// Looks an edge endpoint up by the identifier its agent presents.
    pub fn by_edge_id(&self, edge_id: &str) -> Result<Option<Endpoint>, StoreError> {
        self.store().view(|tx| by_edge_id_tx(tx, edge_id))
    }
}

pub fn by_edge_id_tx(tx: &impl TxRead, edge_id: &str) -> Result<Option<Endpoint>, StoreError> {
    let mut found = None;
    tx.for_each(Endpoint::BUCKET, |_, endpoint: Endpoint| {
        if found.is_none() && endpoint.kind.is_edge() && endpoint.edge_id == edge_id {
            found = Some(endpoint);
        }
        Ok(())
    })?;
    Ok(found)
}

#[cfg(test)]
pub(crate) fn test_endpoint(id: u32, kind: EndpointType) -> Endpoint {
    Endpoint {
        id: EndpointId(id),
        name: format!("endpoint-{id}"),
        kind,
        url: String::new(),
        tls: TlsConfig::default(),
        status: EndpointStatus::Up,
        heartbeat: false,
        container_engine: ContainerEngine::Docker,
        group_id: EndpointGroupId(1),
        tag_ids: Vec::new(),
        user_access_policies: Vec::new(),
        team_access_policies: Vec::new(),
        edge: EdgeSettings::default(),
        user_trusted: true,
        edge_id: String::new(),
        docker_snapshot: None,
        kubernetes_snapshot: None,
        snapshot_error: None,
        last_checkin: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoSuite;
    use crate::store::Store;

    #[test]
    fn by_edge_id_matches_edge_endpoints_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path(), None, CryptoSuite::Standard, false).expect("store");
        let svc = EndpointService::new(store);

        let mut local = test_endpoint(0, EndpointType::Docker);
        local.edge_id = "shared-id".into();
        svc.create(&mut local).expect("create");

        let mut edge = test_endpoint(0, EndpointType::EdgeAgentOnDocker);
        edge.edge_id = "shared-id".into();
        svc.create(&mut edge).expect("create");

        let found = svc.by_edge_id("shared-id").expect("lookup").expect("found");
        assert_eq!(found.id, edge.id);

        assert!(svc.by_edge_id("missing").expect("lookup").is_none());
    }

    #[test]
    fn access_is_granted_through_endpoint_or_group_policies() {
        let mut endpoint = test_endpoint(1, EndpointType::Docker);
        endpoint.user_access_policies = vec![UserId(2)];

        assert!(endpoint.grants_access(None, UserId(2), &[]));
        assert!(!endpoint.grants_access(None, UserId(3), &[]));

        let group = crate::persistence::EndpointGroup {
            id: EndpointGroupId(1),
            name: "staging".into(),
            description: String::new(),
            tag_ids: Vec::new(),
            user_access_policies: Vec::new(),
            team_access_policies: vec![TeamId(9)],
        };
        assert!(endpoint.grants_access(Some(&group), UserId(3), &[TeamId(9)]));
    }
}
