//! Compose/manifest stacks deployed against a single endpoint, plus the
//! webhook index that keeps webhook tokens globally unique.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::{EndpointId, StackId};
use crate::store::{StoreError, TxRead, WriteTx};

const WEBHOOK_BUCKET: &str = "stack_webhooks";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    pub url: String,
    #[serde(default)]
    pub reference: String,
    /// Commit the deployment is currently pinned to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AutoUpdateSettings {
    /// Polling interval, e.g. `5m`; empty disables polling.
    #[serde(default)]
    pub interval: String,
    /// Webhook token triggering a redeploy; globally unique across stacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub id: StackId,
    pub name: String,
    pub endpoint_id: EndpointId,
    #[serde(default)]
    pub entry_point: String,
    #[serde(default)]
    pub file_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_update: Option<AutoUpdateSettings>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Stack {
    const BUCKET: &'static str = "stacks";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = StackId(id);
    }
}

pub type StackService = Service<Stack>;

impl Service<Stack> {
    /// Registers `webhook` for `stack`, releasing the stack's previous token.
    /// Fails with [`StoreError::NotFound`] absent stacks and refuses tokens
    /// already claimed by another stack.
    pub fn claim_webhook(&self, stack_id: StackId, webhook: &str) -> Result<(), StoreError> {
        self.store()
            .update(|tx| claim_webhook_in(self, tx, stack_id, webhook))
    }

    pub fn stack_by_webhook(&self, webhook: &str) -> Result<Option<StackId>, StoreError> {
        self.store().view(|tx| {
            if !tx.exists(WEBHOOK_BUCKET, webhook) {
                return Ok(None);
            }
            tx.get(WEBHOOK_BUCKET, webhook).map(Some)
        })
    }
}

fn claim_webhook_in(
    stacks: &Service<Stack>,
    tx: &mut WriteTx,
    stack_id: StackId,
    webhook: &str,
) -> Result<(), StoreError> {
    let mut stack: Stack = stacks.tx(tx).read(stack_id.0)?;

    if tx.exists(WEBHOOK_BUCKET, webhook) {
        let owner: StackId = tx.get(WEBHOOK_BUCKET, webhook)?;
        if owner != stack_id {
            return Err(StoreError::Conflict("webhook token already in use".into()));
        }
    }

    if let Some(previous) = stack.auto_update.as_ref().and_then(|au| au.webhook.clone()) {
        if previous != webhook && tx.exists(WEBHOOK_BUCKET, &previous) {
            tx.delete(WEBHOOK_BUCKET, &previous)?;
        }
    }

    tx.put(WEBHOOK_BUCKET, webhook, &stack_id)?;
    stack
        .auto_update
        .get_or_insert_with(AutoUpdateSettings::default)
        .webhook = Some(webhook.to_string());
    stacks.tx(tx).update(stack_id.0, &stack)
}

/// Whether the error is a webhook collision.
pub fn is_webhook_conflict(err: &StoreError) -> bool {
    matches!(err, StoreError::Conflict(_))
}
