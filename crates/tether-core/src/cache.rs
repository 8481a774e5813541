//! Cache mapping host-assigned object ids to their local proxies.
//!
//! The cache guarantees identity stability: decoding two metas that carry
//! the same host id within one process yields the same proxy instance. It
//! holds only weak references: a cache entry never keeps a proxy alive, so
//! ordinary unreachability still triggers the release handshake.

use crate::proxy::{RemoteObject, RemoteObjectInner};
use std::collections::HashMap;
use std::sync::{Mutex, Weak};

/// Weak id-to-proxy map. Dead entries are pruned on access.
#[derive(Debug, Default)]
pub struct RemoteObjectCache {
    entries: Mutex<HashMap<u64, Weak<RemoteObjectInner>>>,
}

impl RemoteObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live proxy registered under `id`, if any.
    pub fn get(&self, id: u64) -> Option<RemoteObject> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(&id) {
            Some(weak) => match weak.upgrade() {
                Some(inner) => Some(RemoteObject::from_inner(inner)),
                None => {
                    entries.remove(&id);
                    None
                }
            },
            None => None,
        }
    }

    /// Whether a live proxy is registered under `id`.
    pub fn has(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    /// Register `proxy` under `id`, replacing any dead entry. The id may be
    /// reused by the host for an unrelated object after the previous proxy
    /// was released.
    pub fn set(&self, id: u64, proxy: &RemoteObject) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id, proxy.downgrade());
        }
    }

    /// Drop the entry for `id`, if present.
    pub fn evict(&self, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }

    /// Number of live entries (dead ones are pruned first).
    pub fn live_count(&self) -> usize {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.retain(|_, weak| weak.strong_count() > 0);
                entries.len()
            }
            Err(_) => 0,
        }
    }
}
