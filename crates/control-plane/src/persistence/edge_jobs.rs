use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::{EdgeGroupId, EdgeJobId, EndpointId};

/// Cron script dispatched to all endpoints of a set of edge groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeJob {
    pub id: EdgeJobId,
    pub name: String,
    pub cron_expression: String,
    pub script: String,
    pub edge_groups: Vec<EdgeGroupId>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Endpoints that have reported a log for the current version.
    #[serde(default)]
    pub collected_logs: Vec<EndpointId>,
}

impl Entity for EdgeJob {
    const BUCKET: &'static str = "edge_jobs";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = EdgeJobId(id);
    }
}

pub type EdgeJobService = Service<EdgeJob>;
