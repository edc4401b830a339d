use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::base::{read_tx, Entity, Service};
use super::relations::EdgeStackCounter;
use super::{EdgeGroupId, EdgeStackId};
use crate::store::{StoreError, WriteTx};

/// Declarative compose/manifest artifact dispatched to edge groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeStack {
    pub id: EdgeStackId,
    pub name: String,
    pub edge_groups: Vec<EdgeGroupId>,
    pub stack_file: String,
    /// Bumped on every file change; agents redeploy on a version bump.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Derived: number of endpoints currently targeted through the stack's
    /// edge groups. Maintained by the relation service, never written
    /// directly.
    #[serde(default)]
    pub num_deployments: u32,
}

impl Entity for EdgeStack {
    const BUCKET: &'static str = "edge_stacks";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = EdgeStackId(id);
    }
}

pub type EdgeStackService = Service<EdgeStack>;

/// [`EdgeStackCounter`] implementation adjusting `num_deployments` in the
/// caller's transaction.
#[derive(Clone)]
pub struct DeploymentCounter {
    stacks: EdgeStackService,
}

impl DeploymentCounter {
    pub fn new(stacks: EdgeStackService) -> Self {
        Self { stacks }
    }
}

impl EdgeStackCounter for DeploymentCounter {
    fn adjust(&self, tx: &mut WriteTx, stack: EdgeStackId, delta: i64) -> Result<(), StoreError> {
        let mut record: EdgeStack = read_tx(tx, stack.0)?;

        if delta < 0 && record.num_deployments < delta.unsigned_abs() as u32 {
            // Sanity check: the relation set and the counter have drifted.
            // Refuse to wrap around and leave the counter at zero.
            error!(
                stack = %stack,
                num_deployments = record.num_deployments,
                delta,
                "refusing to decrement deployment counter below zero"
            );
            record.num_deployments = 0;
        } else {
            record.num_deployments = (record.num_deployments as i64 + delta) as u32;
        }

        let mut stacks = self.stacks.tx(tx);
        stacks.update(stack.0, &record)
    }
}

