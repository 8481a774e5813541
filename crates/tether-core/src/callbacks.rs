//! Registry of local functions the host process can invoke by id.
//!
//! A function value sent to the host as an argument is retained here under a
//! fresh id; the host invokes it later via an asynchronous `callback-invoke`
//! push and discards it via `callback-release`. Invocation can race release,
//! so unknown ids are silently ignored.

use crate::value::{Callback, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Maps opaque integer ids to retained local callbacks.
///
/// The lock guards only map mutation; callbacks are invoked after the guard
/// is dropped, so a callback may re-enter the registry.
#[derive(Debug, Default)]
pub struct CallbacksRegistry {
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, Callback>>,
}

impl CallbacksRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// Retain `callback` and return its fresh id.
    pub fn add(&self, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.insert(id, callback);
        }
        id
    }

    /// Invoke the callback registered under `id` with already-decoded
    /// arguments. Unknown ids are a no-op (the host may race an invocation
    /// against a release).
    pub fn apply(&self, id: u64, args: Vec<Value>) {
        let callback = match self.callbacks.lock() {
            Ok(callbacks) => callbacks.get(&id).cloned(),
            Err(_) => None,
        };
        match callback {
            Some(callback) => {
                callback.invoke(args);
            }
            None => {
                debug!("Ignoring invocation of unknown callback id {}", id);
            }
        }
    }

    /// Drop the callback registered under `id`. Unknown ids are a no-op.
    pub fn remove(&self, id: u64) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.remove(&id);
        }
    }

    /// Number of currently retained callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_callback(counter: Arc<AtomicUsize>) -> Callback {
        match Value::callback("test.rs:1", move |_args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Value::Null
        }) {
            Value::Callback(cb) => cb,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_add_assigns_fresh_ids() {
        let registry = CallbacksRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let a = registry.add(counting_callback(counter.clone()));
        let b = registry.add(counting_callback(counter));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_apply_invokes_with_args() {
        let registry = CallbacksRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cb = match Value::callback("test.rs:2", move |args| {
            seen2.lock().unwrap().extend(args);
            Value::Null
        }) {
            Value::Callback(cb) => cb,
            _ => unreachable!(),
        };

        let id = registry.add(cb);
        registry.apply(id, vec![Value::Number(2.0), Value::Text("x".to_string())]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[Value::Number(2.0), Value::Text("x".to_string())]);
    }

    #[test]
    fn test_apply_after_remove_is_noop() {
        let registry = CallbacksRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = registry.add(counting_callback(counter.clone()));

        registry.remove(id);
        registry.apply(id, vec![]);

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_id_is_noop() {
        let registry = CallbacksRegistry::new();
        registry.remove(424242);
    }
}
