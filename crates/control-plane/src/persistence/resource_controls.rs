//! Per-resource ACL records gating non-admin access to individual
//! Docker/Kubernetes objects.

use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::{ResourceControlId, TeamId, UserId};
use crate::store::{StoreError, TxRead};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceControlType {
    Container,
    Service,
    Volume,
    Network,
    Secret,
    Config,
    Stack,
    CustomTemplate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    /// Visible and writable by every authenticated user.
    Public,
    /// Owned by the users/teams listed on the record.
    Private,
    /// Readable by the users/teams listed on the record.
    Restricted,
    /// Reserved for administrators; non-admins cannot touch it at all.
    Administrators,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceControl {
    pub id: ResourceControlId,
    /// Canonical downstream identifier; a Docker ID, or a Swarm-scoped name
    /// for types whose API never exposes a separate ID.
    pub resource_id: String,
    pub kind: ResourceControlType,
    pub ownership: Ownership,
    #[serde(default)]
    pub user_ids: Vec<UserId>,
    #[serde(default)]
    pub team_ids: Vec<TeamId>,
}

impl ResourceControl {
    /// Whether a non-admin caller may access the controlled resource: the
    /// record is public, or the caller (or one of their teams) is listed.
    /// Administrators-only records never authorise non-admins; admin callers
    /// bypass this check entirely.
    pub fn authorizes(&self, user: UserId, teams: &[TeamId]) -> bool {
        match self.ownership {
            Ownership::Public => true,
            Ownership::Administrators => false,
            Ownership::Private | Ownership::Restricted => {
                self.user_ids.contains(&user)
                    || self.team_ids.iter().any(|team| teams.contains(team))
            }
        }
    }
}

impl Entity for ResourceControl {
    const BUCKET: &'static str = "resource_controls";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = ResourceControlId(id);
    }
}

pub type ResourceControlService = Service<ResourceControl>;

impl Service<ResourceControl> {
    pub fn by_resource(
        &self,
        kind: ResourceControlType,
        resource_id: &str,
    ) -> Result<Option<ResourceControl>, StoreError> {
        self.store().view(|tx| by_resource_tx(tx, kind, resource_id))
    }
}

pub fn by_resource_tx(
    tx: &impl TxRead,
    kind: ResourceControlType,
    resource_id: &str,
) -> Result<Option<ResourceControl>, StoreError> {
    let mut found = None;
    tx.for_each(ResourceControl::BUCKET, |_, control: ResourceControl| {
        if found.is_none() && control.kind == kind && control.resource_id == resource_id {
            found = Some(control);
        }
        Ok(())
    })?;
    Ok(found)
}
