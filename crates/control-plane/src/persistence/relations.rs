//! Endpoint relations: which edge stacks have been pushed to an endpoint.
//!
//! Every mutation of the (endpoint, stack) pair set runs through this
//! service. It computes the difference against the previous state and, in
//! the same transaction, adjusts each affected stack's deployment counter
//! and drops the endpoint's poll-cache entry. Readers therefore never
//! observe a counter that drifts from the relations.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::base::{read_tx, Entity, Service};
use super::{EdgeStackId, EndpointId};
use crate::edge::cache::PollCache;
use crate::store::{Store, StoreError, WriteTx};

/// Interface the relation service uses to keep `EdgeStack.num_deployments`
/// consistent without depending on the stack service directly.
pub trait EdgeStackCounter: Send + Sync {
    fn adjust(&self, tx: &mut WriteTx, stack: EdgeStackId, delta: i64) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRelation {
    pub endpoint_id: EndpointId,
    #[serde(default)]
    pub edge_stacks: BTreeSet<EdgeStackId>,
}

impl EndpointRelation {
    pub fn empty(endpoint_id: EndpointId) -> Self {
        Self {
            endpoint_id,
            edge_stacks: BTreeSet::new(),
        }
    }
}

impl Entity for EndpointRelation {
    const BUCKET: &'static str = "endpoint_relations";

    fn id(&self) -> u32 {
        self.endpoint_id.0
    }

    fn set_id(&mut self, id: u32) {
        self.endpoint_id = EndpointId(id);
    }
}

#[derive(Clone)]
pub struct RelationService {
    base: Service<EndpointRelation>,
    counter: Arc<dyn EdgeStackCounter>,
    cache: PollCache,
}

impl RelationService {
    pub fn new(store: Store, counter: Arc<dyn EdgeStackCounter>, cache: PollCache) -> Self {
        Self {
            base: Service::new(store),
            counter,
            cache,
        }
    }

    pub fn read(&self, endpoint: EndpointId) -> Result<EndpointRelation, StoreError> {
        self.base.read(endpoint.0)
    }

    pub fn read_all(&self) -> Result<Vec<EndpointRelation>, StoreError> {
        self.base.read_all()
    }

    pub fn create(&self, relation: &EndpointRelation) -> Result<(), StoreError> {
        self.base
            .store()
            .update(|tx| self.create_in(tx, relation))
    }

    pub fn create_in(&self, tx: &mut WriteTx, relation: &EndpointRelation) -> Result<(), StoreError> {
        self.base
            .tx(tx)
            .create_with_id(relation.endpoint_id.0, relation)?;
        self.settle(tx, relation.endpoint_id, None, Some(&relation.edge_stacks))
    }

    pub fn update(
        &self,
        endpoint: EndpointId,
        relation: &EndpointRelation,
    ) -> Result<(), StoreError> {
        self.base
            .store()
            .update(|tx| self.update_in(tx, endpoint, relation))
    }

    pub fn update_in(
        &self,
        tx: &mut WriteTx,
        endpoint: EndpointId,
        relation: &EndpointRelation,
    ) -> Result<(), StoreError> {
        let previous: Option<EndpointRelation> = read_tx(tx, endpoint.0).ok();
        self.base.tx(tx).update(endpoint.0, relation)?;

        let previous_stacks = previous.map(|p| p.edge_stacks);
        self.settle(tx, endpoint, previous_stacks.as_ref(), Some(&relation.edge_stacks))
    }

    pub fn delete(&self, endpoint: EndpointId) -> Result<(), StoreError> {
        self.base.store().update(|tx| self.delete_in(tx, endpoint))
    }

    pub fn delete_in(&self, tx: &mut WriteTx, endpoint: EndpointId) -> Result<(), StoreError> {
        let previous: Option<EndpointRelation> = read_tx(tx, endpoint.0).ok();
        self.base.tx(tx).delete(endpoint.0)?;

        let previous_stacks = previous.map(|p| p.edge_stacks);
        self.settle(tx, endpoint, previous_stacks.as_ref(), None)
    }

    /// Marks a stack as pushed to every listed endpoint.
    pub fn add_stack_to_endpoints_in(
        &self,
        tx: &mut WriteTx,
        endpoints: &[EndpointId],
        stack: EdgeStackId,
    ) -> Result<(), StoreError> {
        for &endpoint in endpoints {
            let mut relation: EndpointRelation =
                read_tx(tx, endpoint.0).unwrap_or_else(|_| EndpointRelation::empty(endpoint));
            if relation.edge_stacks.insert(stack) {
                self.base.tx(tx).create_with_id(endpoint.0, &relation)?;
                self.counter.adjust(tx, stack, 1)?;
            }
            self.cache.del(endpoint);
        }
        Ok(())
    }

    /// Removes a stack from every listed endpoint.
    pub fn remove_stack_from_endpoints_in(
        &self,
        tx: &mut WriteTx,
        endpoints: &[EndpointId],
        stack: EdgeStackId,
    ) -> Result<(), StoreError> {
        for &endpoint in endpoints {
            let Ok(mut relation) = read_tx::<EndpointRelation>(tx, endpoint.0) else {
                continue;
            };
            if relation.edge_stacks.remove(&stack) {
                self.base.tx(tx).create_with_id(endpoint.0, &relation)?;
                self.counter.adjust(tx, stack, -1)?;
            }
            self.cache.del(endpoint);
        }
        Ok(())
    }

    /// Applies the (added, removed) difference to the deployment counters and
    /// invalidates the endpoint's poll cache.
    fn settle(
        &self,
        tx: &mut WriteTx,
        endpoint: EndpointId,
        previous: Option<&BTreeSet<EdgeStackId>>,
        updated: Option<&BTreeSet<EdgeStackId>>,
    ) -> Result<(), StoreError> {
        let empty = BTreeSet::new();
        let previous = previous.unwrap_or(&empty);
        let updated = updated.unwrap_or(&empty);

        for &removed in previous.difference(updated) {
            self.counter.adjust(tx, removed, -1)?;
        }
        for &added in updated.difference(previous) {
            self.counter.adjust(tx, added, 1)?;
        }

        self.cache.del(endpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoSuite;
    use crate::persistence::edge_stacks::DeploymentCounter;
    use crate::persistence::{EdgeGroupId, EdgeStack, EdgeStackService};
    use chrono::Utc;

    fn fixture() -> (tempfile::TempDir, EdgeStackService, RelationService, PollCache) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path(), None, CryptoSuite::Standard, false).expect("store");
        let stacks = EdgeStackService::new(store.clone());
        let cache = PollCache::new();
        let relations = RelationService::new(
            store,
            Arc::new(DeploymentCounter::new(stacks.clone())),
            cache.clone(),
        );
        (dir, stacks, relations, cache)
    }

    fn stack(stacks: &EdgeStackService, groups: Vec<EdgeGroupId>) -> EdgeStack {
        let mut stack = EdgeStack {
            id: EdgeStackId(0),
            name: "app".into(),
            edge_groups: groups,
            stack_file: "services: {}".into(),
            version: 1,
            created_at: Utc::now(),
            num_deployments: 0,
        };
        stacks.create(&mut stack).expect("create stack");
        stack
    }

    #[test]
    fn deployment_count_follows_relations() {
        let (_dir, stacks, relations, _cache) = fixture();
        let stack = stack(&stacks, vec![EdgeGroupId(1), EdgeGroupId(2)]);

        for endpoint in [EndpointId(1), EndpointId(2)] {
            let relation = EndpointRelation {
                endpoint_id: endpoint,
                edge_stacks: BTreeSet::from([stack.id]),
            };
            relations.create(&relation).expect("create relation");
        }
        assert_eq!(stacks.read(stack.id.0).expect("read").num_deployments, 2);

        relations.delete(EndpointId(1)).expect("delete relation");
        assert_eq!(stacks.read(stack.id.0).expect("read").num_deployments, 1);
    }

    #[test]
    fn update_applies_the_set_difference() {
        let (_dir, stacks, relations, _cache) = fixture();
        let first = stack(&stacks, vec![EdgeGroupId(1)]);
        let second = stack(&stacks, vec![EdgeGroupId(1)]);

        let endpoint = EndpointId(7);
        relations
            .create(&EndpointRelation {
                endpoint_id: endpoint,
                edge_stacks: BTreeSet::from([first.id]),
            })
            .expect("create");

        relations
            .update(
                endpoint,
                &EndpointRelation {
                    endpoint_id: endpoint,
                    edge_stacks: BTreeSet::from([second.id]),
                },
            )
            .expect("update");

        assert_eq!(stacks.read(first.id.0).expect("read").num_deployments, 0);
        assert_eq!(stacks.read(second.id.0).expect("read").num_deployments, 1);
    }

    #[test]
    fn counter_never_wraps_below_zero() {
        let (_dir, stacks, relations, _cache) = fixture();
        let stack = stack(&stacks, vec![EdgeGroupId(1)]);

        // Force drift by decrementing a counter that is already zero.
        relations
            .base
            .store()
            .update(|tx| {
                relations
                    .remove_stack_from_endpoints_in(tx, &[], stack.id)
                    .and_then(|_| relations.counter.adjust(tx, stack.id, -1))
            })
            .expect("adjust");

        assert_eq!(stacks.read(stack.id.0).expect("read").num_deployments, 0);
    }

    #[test]
    fn relation_writes_invalidate_the_poll_cache() {
        let (_dir, stacks, relations, cache) = fixture();
        let stack = stack(&stacks, vec![EdgeGroupId(1)]);
        let endpoint = EndpointId(3);

        cache.set(
            endpoint,
            common::api::EdgeStatusResponse {
                status: common::api::TunnelStatus::Idle,
                port: 0,
                credentials: None,
                checkin_interval: 5,
                stacks: Vec::new(),
                schedules: Vec::new(),
            },
        );

        relations
            .create(&EndpointRelation {
                endpoint_id: endpoint,
                edge_stacks: BTreeSet::from([stack.id]),
            })
            .expect("create");
        assert!(cache.get(endpoint).is_none());
    }
}
