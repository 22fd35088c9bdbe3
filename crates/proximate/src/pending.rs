//! Pending-request table — nonce → settlement channel for in-flight calls.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ProximateError, ProximateResult};
use crate::value::Value;

type Settler = oneshot::Sender<ProximateResult<Value>>;

/// Per-connection table of in-flight requests awaiting a response.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<String, Settler>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a request; the receiver half resolves when the response
    /// arrives (or the connection closes).
    pub(crate) fn insert(&self, id: String) -> oneshot::Receiver<ProximateResult<Value>> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(id, tx);
        rx
    }

    /// Drop a registration, e.g. when posting the request failed.
    pub(crate) fn remove(&self, id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(id);
    }

    /// Settle a request. A response with no matching entry may belong to a
    /// cancelled or fire-and-forget exchange; it is logged and dropped.
    pub(crate) fn settle(&self, id: &str, outcome: ProximateResult<Value>) {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.remove(id)
        };
        match entry {
            Some(tx) => {
                // The caller may have dropped its future; nothing to do then.
                let _ = tx.send(outcome);
            }
            None => match outcome {
                Ok(_) => debug!(id, "dropping response with no pending request"),
                Err(err) => debug!(id, %err, "dropping error response with no pending request"),
            },
        }
    }

    /// Reject every remaining entry with connection-closed.
    pub(crate) fn reject_all(&self) {
        let drained: Vec<Settler> = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(ProximateError::ConnectionClosed));
        }
    }
}
