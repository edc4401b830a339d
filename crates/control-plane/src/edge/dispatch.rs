//! Reconciliation between edge-group membership and endpoint relations.
//!
//! Whatever changes the (endpoint, stack) target set — stack creation,
//! edits to a stack's group list, group membership changes, endpoint
//! trust — funnels through [`reconcile_stack_in`], which applies the set
//! difference through the relation service inside the caller's transaction.

use std::collections::BTreeSet;

use crate::edge::cache::PollCache;
use crate::edge::edge_group_related_endpoints;
use crate::persistence::{
    read_all_tx, read_tx, DataServices, EdgeGroup, EdgeGroupId, EdgeStack, EdgeStackId, Endpoint,
    EndpointGroup, EndpointId, EndpointRelation,
};
use crate::store::{StoreError, TxRead, WriteTx};

/// Endpoints currently targeted through any of `group_ids`.
pub fn desired_endpoints_tx(
    tx: &impl TxRead,
    group_ids: &[EdgeGroupId],
) -> Result<Vec<EndpointId>, StoreError> {
    let endpoints = read_all_tx::<Endpoint>(tx)?;
    let endpoint_groups = read_all_tx::<EndpointGroup>(tx)?;

    let mut desired = BTreeSet::new();
    for &group_id in group_ids {
        let group: EdgeGroup = read_tx(tx, group_id.0)?;
        desired.extend(edge_group_related_endpoints(
            &group,
            &endpoints,
            &endpoint_groups,
        ));
    }
    Ok(desired.into_iter().collect())
}

/// Endpoints whose relation currently carries `stack_id`.
pub fn current_endpoints_tx(
    tx: &impl TxRead,
    stack_id: EdgeStackId,
) -> Result<Vec<EndpointId>, StoreError> {
    Ok(read_all_tx::<EndpointRelation>(tx)?
        .into_iter()
        .filter(|relation| relation.edge_stacks.contains(&stack_id))
        .map(|relation| relation.endpoint_id)
        .collect())
}

/// Brings the relation set in line with the stack's group membership.
pub fn reconcile_stack_in(
    services: &DataServices,
    tx: &mut WriteTx,
    stack: &EdgeStack,
) -> Result<(), StoreError> {
    let desired = desired_endpoints_tx(tx, &stack.edge_groups)?;
    let current = current_endpoints_tx(tx, stack.id)?;

    let added: Vec<EndpointId> = desired
        .iter()
        .filter(|endpoint| !current.contains(endpoint))
        .copied()
        .collect();
    let removed: Vec<EndpointId> = current
        .iter()
        .filter(|endpoint| !desired.contains(endpoint))
        .copied()
        .collect();

    services
        .relations
        .add_stack_to_endpoints_in(tx, &added, stack.id)?;
    services
        .relations
        .remove_stack_from_endpoints_in(tx, &removed, stack.id)
}

/// Detaches a stack from every endpoint; used when the stack is deleted.
pub fn detach_stack_in(
    services: &DataServices,
    tx: &mut WriteTx,
    stack_id: EdgeStackId,
) -> Result<(), StoreError> {
    let current = current_endpoints_tx(tx, stack_id)?;
    services
        .relations
        .remove_stack_from_endpoints_in(tx, &current, stack_id)
}

/// Drops cached poll payloads for every endpoint the stack targets; used for
/// content-only changes where membership is unchanged but agents must see
/// the new version.
pub fn invalidate_cache_for_stack(
    cache: &PollCache,
    tx: &impl TxRead,
    stack_id: EdgeStackId,
) -> Result<(), StoreError> {
    for endpoint in current_endpoints_tx(tx, stack_id)? {
        cache.del(endpoint);
    }
    Ok(())
}
