//! A named document: its graph store and live subscribers behind one lock.
//!
//! Every operation takes the same mutex, so reads never observe a partial
//! append and a notify pass never interleaves with a closure query or a
//! subscription change.

use tokio::sync::Mutex;

use crate::broadcast::{DeliveryFn, HubStats, SubscriberHub, SubscriberToken};
use crate::protocol::Vertex;
use crate::storage::{GraphStore, StoreError};

/// Snapshot of a document's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStats {
    pub vertices: u64,
    pub hub: HubStats,
}

pub(crate) struct DocumentState {
    pub(crate) store: GraphStore,
    pub(crate) hub: SubscriberHub,
}

pub struct Document {
    name: String,
    pub(crate) state: Mutex<DocumentState>,
}

impl Document {
    pub fn new(name: impl Into<String>, store: GraphStore) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DocumentState {
                store,
                hub: SubscriberHub::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persist a vertex, then push it to every live subscriber before
    /// releasing the lock. Returns the vertex's sequence number.
    pub async fn append(&self, vertex: Vertex) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let seq = state.store.append(&vertex)?;
        let delivered = state.hub.notify(&vertex);
        log::debug!(
            "Appended {} to {} (seq {seq}, {delivered} subscriber(s))",
            vertex.id,
            self.name
        );
        Ok(seq)
    }

    /// Vertices outside the ancestor-closure of `after`, in commit order.
    pub async fn closure_complement(&self, after: &[String]) -> Result<Vec<Vertex>, StoreError> {
        let state = self.state.lock().await;
        state.store.closure_complement(after)
    }

    pub async fn subscribe(&self, deliver: DeliveryFn) -> SubscriberToken {
        self.state.lock().await.hub.subscribe(deliver)
    }

    pub async fn unsubscribe(&self, token: SubscriberToken) -> bool {
        self.state.lock().await.hub.unsubscribe(token)
    }

    /// Backlog plus live subscription in one critical section.
    ///
    /// The returned backlog holds everything committed before the
    /// subscription; `deliver` sees everything committed after it. The caller
    /// must hand the backlog to its client before anything `deliver` queued.
    pub async fn subscribe_after(
        &self,
        after: &[String],
        deliver: DeliveryFn,
    ) -> Result<(Vec<Vertex>, SubscriberToken), StoreError> {
        let mut state = self.state.lock().await;
        let backlog = state.store.closure_complement(after)?;
        let token = state.hub.subscribe(deliver);
        Ok((backlog, token))
    }

    pub async fn stats(&self) -> DocumentStats {
        let state = self.state.lock().await;
        DocumentStats {
            vertices: state.store.len(),
            hub: state.hub.stats(),
        }
    }
}
