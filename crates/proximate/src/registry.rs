//! Receiver registry — the process-wide map of objects exposed to remote
//! peers.
//!
//! The registry is shared by every connection in the process, so offering the
//! same object to two peers yields a single entry with a count of two. An
//! entry exists iff its count is positive; when a count reaches zero both the
//! forward and the inverse mapping are dropped. The empty-string id is never
//! stored here — it is an on-the-wire placeholder that each connection maps
//! to its own primary id before lookup.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use tracing::debug;

use crate::nonce::nonce;
use crate::value::Value;

/// A registered receiver and its live reference count.
struct Entry {
    value: Value,
    count: u64,
}

#[derive(Default)]
struct Maps {
    /// id → receiver + count.
    entries: HashMap<String, Entry>,
    /// pointer identity → id, for stable re-registration.
    inverse: HashMap<usize, String>,
}

/// Thread-safe, reference-counted registry of exposed receivers.
pub struct ReceiverRegistry {
    maps: RwLock<Maps>,
}

static REGISTRY: OnceLock<ReceiverRegistry> = OnceLock::new();

/// The process-wide registry instance.
pub fn registry() -> &'static ReceiverRegistry {
    REGISTRY.get_or_init(ReceiverRegistry::new)
}

impl ReceiverRegistry {
    fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
        }
    }

    /// Register a receiver (or bump an existing registration) and return its
    /// id. Identity-bearing values (objects, handles, buffers) re-register
    /// under their existing id; other values get a fresh id each time.
    pub fn inc_ref(&self, value: &Value) -> String {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        if let Some(addr) = value.identity() {
            if let Some(id) = maps.inverse.get(&addr).cloned() {
                if let Some(entry) = maps.entries.get_mut(&id) {
                    entry.count += 1;
                    return id;
                }
            }
            let id = nonce();
            maps.entries.insert(
                id.clone(),
                Entry {
                    value: value.clone(),
                    count: 1,
                },
            );
            maps.inverse.insert(addr, id.clone());
            id
        } else {
            let id = nonce();
            maps.entries.insert(
                id.clone(),
                Entry {
                    value: value.clone(),
                    count: 1,
                },
            );
            id
        }
    }

    /// Subtract `n` from an entry's count, dropping the entry (and its
    /// inverse mapping) when it reaches zero. Unknown ids are ignored.
    pub fn dec_ref(&self, id: &str, n: u64) {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = maps.entries.get_mut(id) else {
            debug!(id, "dec_ref on unknown receiver id");
            return;
        };
        entry.count = entry.count.saturating_sub(n);
        if entry.count == 0 {
            let addr = entry.value.identity();
            maps.entries.remove(id);
            if let Some(addr) = addr {
                maps.inverse.remove(&addr);
            }
        }
    }

    /// Remove a receiver unconditionally, regardless of count. Remote
    /// requests against any lingering id are rejected as unknown-receiver.
    pub fn revoke_all(&self, value: &Value) {
        let Some(addr) = value.identity() else {
            return;
        };
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = maps.inverse.remove(&addr) {
            maps.entries.remove(&id);
        }
    }

    /// Look up a receiver by id.
    pub fn lookup(&self, id: &str) -> Option<Value> {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.entries.get(id).map(|e| e.value.clone())
    }

    /// The id a value is currently registered under, if any.
    pub fn id_of(&self, value: &Value) -> Option<String> {
        let addr = value.identity()?;
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.inverse.get(&addr).cloned()
    }

    /// Whether an id is currently registered.
    pub fn contains(&self, id: &str) -> bool {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.entries.contains_key(id)
    }

    /// Current count for an id (zero if absent).
    pub fn count(&self, id: &str) -> u64 {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.entries.get(id).map(|e| e.count).unwrap_or(0)
    }
}
