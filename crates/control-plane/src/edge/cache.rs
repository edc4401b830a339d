//! Per-endpoint poll cache.
//!
//! The edge status long-poll serves the last payload built for an endpoint
//! until something invalidates it: a relation write, a stack or job change
//! affecting a related group, or an endpoint settings change. Invalidation
//! is a side effect of those writes; the poll handler repopulates lazily.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::api::EdgeStatusResponse;

use crate::persistence::EndpointId;

#[derive(Clone, Default)]
pub struct PollCache {
    inner: Arc<Mutex<HashMap<EndpointId, Arc<EdgeStatusResponse>>>>,
}

impl PollCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, endpoint: EndpointId) -> Option<Arc<EdgeStatusResponse>> {
        self.inner
            .lock()
            .expect("poll cache poisoned")
            .get(&endpoint)
            .cloned()
    }

    pub fn set(&self, endpoint: EndpointId, payload: EdgeStatusResponse) -> Arc<EdgeStatusResponse> {
        let payload = Arc::new(payload);
        self.inner
            .lock()
            .expect("poll cache poisoned")
            .insert(endpoint, payload.clone());
        payload
    }

    pub fn del(&self, endpoint: EndpointId) {
        self.inner
            .lock()
            .expect("poll cache poisoned")
            .remove(&endpoint);
    }

    pub fn clear(&self) {
        self.inner.lock().expect("poll cache poisoned").clear();
    }
}
