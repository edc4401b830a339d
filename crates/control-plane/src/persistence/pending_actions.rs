use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::{EndpointId, PendingActionId};
use crate::store::{StoreError, TxRead, WriteTx};

/// Operation queued for an endpoint, executed on its next successful
/// heartbeat. Writers are expected to be idempotent; the service additionally
/// de-duplicates by `(endpoint, action)` before insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: PendingActionId,
    pub endpoint_id: EndpointId,
    pub action: String,
    #[serde(default)]
    pub action_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Entity for PendingAction {
    const BUCKET: &'static str = "pending_actions";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = PendingActionId(id);
    }
}

pub type PendingActionService = Service<PendingAction>;

impl Service<PendingAction> {
    /// Queues an action unless an identical `(endpoint, action)` pair is
    /// already pending.
    pub fn enqueue(&self, action: &mut PendingAction) -> Result<bool, StoreError> {
        self.store().update(|tx| {
            let mut duplicate = false;
            tx.for_each(PendingAction::BUCKET, |_, existing: PendingAction| {
                if existing.endpoint_id == action.endpoint_id && existing.action == action.action {
                    duplicate = true;
                }
                Ok(())
            })?;
            if duplicate {
                return Ok(false);
            }
            self.tx(tx).create(action)?;
            Ok(true)
        })
    }

    /// Pending actions for one endpoint, in creation order.
    pub fn for_endpoint(&self, endpoint: EndpointId) -> Result<Vec<PendingAction>, StoreError> {
        self.store().view(|tx| for_endpoint_tx(tx, endpoint))
    }

    /// Drops every action queued for an endpoint; part of the endpoint
    /// deletion cascade.
    pub fn delete_for_endpoint_in(
        &self,
        tx: &mut WriteTx,
        endpoint: EndpointId,
    ) -> Result<(), StoreError> {
        let pending = for_endpoint_tx(tx, endpoint)?;
        let mut actions = self.tx(tx);
        for action in pending {
            actions.delete(action.id.0)?;
        }
        Ok(())
    }
}

pub fn for_endpoint_tx(
    tx: &impl TxRead,
    endpoint: EndpointId,
) -> Result<Vec<PendingAction>, StoreError> {
    let mut pending = Vec::new();
    tx.for_each(PendingAction::BUCKET, |_, action: PendingAction| {
        if action.endpoint_id == endpoint {
            pending.push(action);
        }
        Ok(())
    })?;
    Ok(pending)
}
