//! Executor for actions queued against endpoints.
//!
//! Actions run on the next successful heartbeat of their endpoint, in
//! creation order. Each action's side effect and its removal from the queue
//! commit in the same transaction; a failing action stays queued and is
//! re-attempted on every subsequent heartbeat until it succeeds or is
//! deleted.

use tracing::{error, warn};

use crate::persistence::{
    base::read_tx, DataServices, EdgeStack, Endpoint, EndpointId, EndpointRelation, EndpointStatus,
    Entity, PendingAction,
};
use crate::store::{StoreError, TxRead, WriteTx};

/// Drop relation entries pointing at edge stacks that no longer exist.
pub const ACTION_CLEAN_STACK_STATUS: &str = "clean_stack_status";
/// Ensure the endpoint has a relation record.
pub const ACTION_NORMALIZE_RELATION: &str = "normalize_relation";

#[derive(Clone)]
pub struct PendingActionExecutor {
    services: DataServices,
}

impl PendingActionExecutor {
    pub fn new(services: DataServices) -> Self {
        Self { services }
    }

    /// Runs every action queued for the endpoint, skipping entirely when the
    /// endpoint is not reachable. Returns the number of executed actions.
    pub fn execute_for_endpoint(&self, endpoint_id: EndpointId) -> Result<usize, StoreError> {
        let endpoint = self.services.endpoints.read(endpoint_id.0)?;
        if !is_reachable(&endpoint) {
            return Ok(0);
        }

        let queued = self.services.pending_actions.for_endpoint(endpoint_id)?;
        let mut executed = 0;
        for action in queued {
            let outcome = self.services.store().update(|tx| {
                self.run(tx, &action)?;
                self.services.pending_actions.tx(tx).delete(action.id.0)
            });
            match outcome {
                Ok(()) => executed += 1,
                Err(err) => {
                    // Stays queued; the next heartbeat retries it.
                    error!(
                        endpoint = %endpoint_id,
                        action = %action.action,
                        %err,
                        "pending action failed"
                    );
                }
            }
        }
        Ok(executed)
    }

    fn run(&self, tx: &mut WriteTx, action: &PendingAction) -> Result<(), StoreError> {
        match action.action.as_str() {
            ACTION_CLEAN_STACK_STATUS => self.clean_stack_status(tx, action.endpoint_id),
            ACTION_NORMALIZE_RELATION => self.normalize_relation(tx, action.endpoint_id),
            unknown => {
                // Unknown kinds are dropped rather than poisoning the queue.
                warn!(action = unknown, "discarding unknown pending action");
                Ok(())
            }
        }
    }

    fn clean_stack_status(&self, tx: &mut WriteTx, endpoint: EndpointId) -> Result<(), StoreError> {
        let Ok(relation) = read_tx::<EndpointRelation>(tx, endpoint.0) else {
            return Ok(());
        };

        let mut cleaned = relation.clone();
        cleaned
            .edge_stacks
            .retain(|stack| tx.exists(EdgeStack::BUCKET, &crate::store::key_u32(stack.0)));

        if cleaned.edge_stacks.len() != relation.edge_stacks.len() {
            self.services.relations.update_in(tx, endpoint, &cleaned)?;
        }
        Ok(())
    }

    fn normalize_relation(&self, tx: &mut WriteTx, endpoint: EndpointId) -> Result<(), StoreError> {
        if read_tx::<EndpointRelation>(tx, endpoint.0).is_ok() {
            return Ok(());
        }
        self.services
            .relations
            .create_in(tx, &EndpointRelation::empty(endpoint))
    }
}

/// Edge endpoints are reachable while their agent heartbeat is fresh; other
/// endpoints while their last snapshot succeeded.
fn is_reachable(endpoint: &Endpoint) -> bool {
    if endpoint.kind.is_edge() {
        endpoint.heartbeat
    } else {
        endpoint.status == EndpointStatus::Up
    }
}
