//! Wire DTOs for the edge poll protocol.
//!
//! An edge agent long-polls `GET /api/endpoints/{id}/edge/status` and acts on
//! the response: open a reverse tunnel when one is required, then converge on
//! the stacks and jobs listed in the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the agent's edge identifier on every poll.
pub const EDGE_ID_HEADER: &str = "x-berth-edge-id";

/// Tunnel instruction carried in a poll response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TunnelStatus {
    /// No tunnel is needed; keep polling.
    Idle,
    /// Open a reverse tunnel using the port and credentials in the payload.
    Required,
    /// A tunnel is already established for this endpoint.
    Active,
}

impl TunnelStatus {
    /// Returns the canonical uppercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Idle => "IDLE",
            TunnelStatus::Required => "REQUIRED",
            TunnelStatus::Active => "ACTIVE",
        }
    }
}

/// Response body of the edge status long-poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeStatusResponse {
    /// Tunnel instruction for the agent.
    pub status: TunnelStatus,
    /// Server port the agent should dial when a tunnel is required.
    pub port: u16,
    /// Pre-shared tunnel credentials, present only while a tunnel is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    /// Seconds the agent should wait between polls.
    pub checkin_interval: u64,
    /// Stacks the agent must converge on.
    #[serde(default)]
    pub stacks: Vec<EdgeStackPayload>,
    /// Scheduled jobs the agent must install.
    #[serde(default)]
    pub schedules: Vec<EdgeJobPayload>,
}

/// A stack definition pushed to an edge agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeStackPayload {
    /// Stack identifier, stable across versions.
    pub id: u32,
    /// Human-readable stack name.
    pub name: String,
    /// Monotonic version; the agent redeploys when it observes a bump.
    pub version: u32,
    /// Compose or manifest file content.
    pub file: String,
}

/// A cron job pushed to an edge agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeJobPayload {
    /// Job identifier.
    pub id: u32,
    /// Cron expression in the agent's local time.
    pub cron_expression: String,
    /// Script body to execute.
    pub script: String,
    /// Monotonic version; the agent reinstalls when it observes a bump.
    pub version: u32,
}

/// Result of one job run, reported back by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeJobLogPayload {
    /// Job the log belongs to.
    pub job_id: u32,
    /// Collected stdout/stderr, already capped by the agent.
    pub log: String,
    /// When the run finished.
    pub collected_at: DateTime<Utc>,
}
