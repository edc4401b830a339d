use serde::{Deserialize, Serialize};

use super::base::{Entity, Service};
use super::{EdgeGroupId, EndpointId, TagId};
use crate::roar::Roar;
use crate::store::{StoreError, TxRead};

/// Membership set of endpoints: static (an enumerated bitmap) or dynamic
/// (a predicate over tag IDs). Exactly one mode is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeGroup {
    pub id: EdgeGroupId,
    pub name: String,
    #[serde(default)]
    pub dynamic: bool,
    /// Dynamic groups: match endpoints carrying at least one listed tag
    /// instead of all of them.
    #[serde(default)]
    pub partial_match: bool,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    #[serde(default)]
    pub endpoint_ids: Roar<EndpointId>,
}

impl EdgeGroup {
    /// Enforces the single-membership-mode invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.dynamic && !self.endpoint_ids.is_empty() {
            return Err("a dynamic edge group cannot enumerate endpoints".into());
        }
        if !self.dynamic && !self.tag_ids.is_empty() {
            return Err("a static edge group cannot carry a tag predicate".into());
        }
        Ok(())
    }
}

impl Entity for EdgeGroup {
    const BUCKET: &'static str = "edge_groups";

    fn id(&self) -> u32 {
        self.id.0
    }

    fn set_id(&mut self, id: u32) {
        self.id = EdgeGroupId(id);
    }
}

pub type EdgeGroupService = Service<EdgeGroup>;

impl Service<EdgeGroup> {
    /// Names of edge stacks or jobs still referencing the group; a non-empty
    /// result blocks deletion.
    pub fn referencing_artifacts(&self, id: EdgeGroupId) -> Result<Vec<String>, StoreError> {
        self.store().view(|tx| {
            let mut names = Vec::new();
            tx.for_each(
                super::EdgeStack::BUCKET,
                |_, stack: super::EdgeStack| {
                    if stack.edge_groups.contains(&id) {
                        names.push(stack.name.clone());
                    }
                    Ok(())
                },
            )?;
            tx.for_each(super::EdgeJob::BUCKET, |_, job: super::EdgeJob| {
                if job.edge_groups.contains(&id) {
                    names.push(job.name.clone());
                }
                Ok(())
            })?;
            Ok(names)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_mixed_membership_modes() {
        let mut group = EdgeGroup {
            id: EdgeGroupId(1),
            name: "stores".into(),
            dynamic: true,
            partial_match: false,
            tag_ids: vec![TagId(1)],
            endpoint_ids: Roar::new(),
        };
        assert!(group.validate().is_ok());

        group.endpoint_ids.add(EndpointId(4));
        assert!(group.validate().is_err());

        let bad_static = EdgeGroup {
            id: EdgeGroupId(2),
            name: "static".into(),
            dynamic: false,
            partial_match: false,
            tag_ids: vec![TagId(1)],
            endpoint_ids: Roar::new(),
        };
        assert!(bad_static.validate().is_err());
    }
}
