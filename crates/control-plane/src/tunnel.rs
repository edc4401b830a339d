//! Reverse-tunnel lifecycle for edge endpoints.
//!
//! Per-endpoint tunnels move `idle -> required -> active -> idle`. A handler
//! that needs to reach an edge environment requires a tunnel, which allocates
//! a port in the high ephemeral range and issues per-tunnel credentials; the
//! agent picks both up on its next poll and establishes the reverse stream.
//! A sweeper closes tunnels idle past the inactivity window and reaps
//! `required` entries whose agent never completed the handshake.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

use common::api::TunnelStatus;

use crate::config::TunnelConfig;
use crate::persistence::EndpointId;

/// Lowest port handed out to reverse tunnels.
pub const MIN_PORT: u16 = 49152;
/// Highest port handed out to reverse tunnels.
pub const MAX_PORT: u16 = 65535;

const ALLOCATION_ATTEMPTS: u32 = 10_000;
const CREDENTIALS_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("no free port available in the ephemeral range")]
    PortExhausted,
    #[error("no active tunnel for endpoint")]
    NoTunnel,
}

#[derive(Debug, Clone)]
pub struct Tunnel {
    pub endpoint_id: EndpointId,
    pub status: TunnelStatus,
    pub port: u16,
    pub credentials: String,
    pub last_activity: Instant,
    /// When the tunnel entered `required`; drives handshake reaping.
    pub required_since: Instant,
    /// Effective agent check-in interval at the time the tunnel was required.
    pub checkin_interval: Duration,
}

/// Single mutator of the tunnel map; every state transition takes its lock.
#[derive(Clone)]
pub struct TunnelManager {
    tunnels: Arc<Mutex<HashMap<EndpointId, Tunnel>>>,
    config: TunnelConfig,
}

impl TunnelManager {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            tunnels: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub async fn details(&self, endpoint: EndpointId) -> Option<Tunnel> {
        self.tunnels.lock().await.get(&endpoint).cloned()
    }

    /// Moves an idle endpoint to `required`, allocating a port and fresh
    /// credentials. Re-requiring an already required or active tunnel only
    /// refreshes its activity timestamp.
    pub async fn require(
        &self,
        endpoint: EndpointId,
        checkin_interval: Duration,
    ) -> Result<Tunnel, TunnelError> {
        let mut tunnels = self.tunnels.lock().await;

        if let Some(tunnel) = tunnels.get_mut(&endpoint) {
            tunnel.last_activity = Instant::now();
            return Ok(tunnel.clone());
        }

        let port = unused_port(&tunnels)?;
        let credentials: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CREDENTIALS_LEN)
            .map(char::from)
            .collect();

        let now = Instant::now();
        let tunnel = Tunnel {
            endpoint_id: endpoint,
            status: TunnelStatus::Required,
            port,
            credentials,
            last_activity: now,
            required_since: now,
            checkin_interval,
        };
        tunnels.insert(endpoint, tunnel.clone());
        gauge!("tunnels_open").set(tunnels.len() as f64);
        Ok(tunnel)
    }

    /// Marks the tunnel active once the agent has established the reverse
    /// stream. Returns false when no tunnel was required.
    pub async fn mark_active(&self, endpoint: EndpointId) -> bool {
        let mut tunnels = self.tunnels.lock().await;
        match tunnels.get_mut(&endpoint) {
            Some(tunnel) => {
                tunnel.status = TunnelStatus::Active;
                tunnel.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Records proxy traffic so the sweeper keeps the tunnel alive.
    pub async fn touch(&self, endpoint: EndpointId) {
        if let Some(tunnel) = self.tunnels.lock().await.get_mut(&endpoint) {
            tunnel.last_activity = Instant::now();
        }
    }

    /// Tears the tunnel down, releasing the port and revoking credentials.
    pub async fn close(&self, endpoint: EndpointId, reason: &str) {
        let mut tunnels = self.tunnels.lock().await;
        if tunnels.remove(&endpoint).is_some() {
            counter!("tunnels_closed_total", "reason" => reason.to_string()).increment(1);
            gauge!("tunnels_open").set(tunnels.len() as f64);
        }
    }

    /// Base URL of the local end of an active tunnel; the caller may retry a
    /// failed dial at most once after re-requiring the tunnel.
    pub async fn api_base_url(&self, endpoint: EndpointId) -> Result<String, TunnelError> {
        let tunnels = self.tunnels.lock().await;
        match tunnels.get(&endpoint) {
            Some(tunnel) if tunnel.status == TunnelStatus::Active => {
                Ok(format!("http://127.0.0.1:{}", tunnel.port))
            }
            _ => Err(TunnelError::NoTunnel),
        }
    }

    /// Closes active tunnels idle past the inactivity window and reaps
    /// `required` tunnels whose agent never completed the handshake within
    /// `reap_multiplier x check-in interval`. Returns the endpoints closed.
    pub async fn sweep(&self) -> Vec<EndpointId> {
        let inactivity = Duration::from_secs(self.config.inactivity_timeout_secs);
        let multiplier = self.config.reap_multiplier;
        let now = Instant::now();

        let mut closed = Vec::new();
        let mut tunnels = self.tunnels.lock().await;
        tunnels.retain(|&endpoint, tunnel| {
            let keep = match tunnel.status {
                TunnelStatus::Active => {
                    now.saturating_duration_since(tunnel.last_activity) <= inactivity
                }
                TunnelStatus::Required => {
                    let reap_after = tunnel.checkin_interval * multiplier;
                    now.saturating_duration_since(tunnel.required_since) <= reap_after
                }
                TunnelStatus::Idle => false,
            };
            if !keep {
                closed.push(endpoint);
            }
            keep
        });

        if !closed.is_empty() {
            counter!("tunnels_closed_total", "reason" => "swept").increment(closed.len() as u64);
            gauge!("tunnels_open").set(tunnels.len() as f64);
        }
        closed
    }
}

/// Allocates a port in `[MIN_PORT, MAX_PORT]` held by no other tunnel and not
/// currently bindable-by-someone-else on loopback. Retries on collision,
/// bounded so exhaustion fails the caller instead of blocking it.
fn unused_port(tunnels: &HashMap<EndpointId, Tunnel>) -> Result<u16, TunnelError> {
    let mut rng = rand::thread_rng();
    for _ in 0..ALLOCATION_ATTEMPTS {
        let port: u16 = rng.gen_range(MIN_PORT..=MAX_PORT);
        if tunnels.values().any(|tunnel| tunnel.port == port) {
            continue;
        }
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_err() {
            continue;
        }
        return Ok(port);
    }
    Err(TunnelError::PortExhausted)
}
