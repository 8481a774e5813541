//! The in-process value universe the codec translates to and from metas.
//!
//! Rust has no ambient dynamic objects, so the values that can cross the
//! boundary are an explicit enum. Containers (`List`, `Object`) are shared
//! and mutable behind an `Arc<Mutex<_>>` so arbitrary graphs, including
//! cyclic ones, are constructible; the serializer uses the `Arc` pointer
//! identity to detect and truncate cycles.
//!
//! Function-shaped values come in two deliberate flavors: [`Value::Callback`]
//! is a callable the host may invoke later by id, while [`Value::Computed`]
//! is evaluated once at send time and only its result crosses the wire. The
//! choice is made explicitly at the call site, never inferred.

use crate::proxy::RemoteObject;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};

/// A value that can be passed to or received from the host process.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Bytes(Bytes),
    Date(DateTime<Utc>),
    /// Shared ordered sequence.
    List(Arc<Mutex<Vec<Value>>>),
    /// Shared keyed object with a constructor display name.
    Object(Arc<Mutex<ObjectValue>>),
    /// A local function the host can invoke by registered id.
    Callback(Callback),
    /// A zero-argument function evaluated at serialization time; only its
    /// result is sent.
    Computed(Computed),
    /// A local pending value.
    Promise(PromiseValue),
    /// A proxy for an object living in the host process.
    Remote(RemoteObject),
}

/// The payload of a [`Value::Object`].
#[derive(Debug, Clone)]
pub struct ObjectValue {
    /// Constructor display name ("Object" for plain data).
    pub class_name: String,
    /// Ordered `(name, value)` entries.
    pub entries: Vec<(String, Value)>,
}

impl Value {
    /// Build a shared list value.
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(Mutex::new(items)))
    }

    /// Build a shared object value.
    pub fn object(class_name: impl Into<String>, entries: Vec<(String, Value)>) -> Self {
        Value::Object(Arc::new(Mutex::new(ObjectValue {
            class_name: class_name.into(),
            entries,
        })))
    }

    /// Build a callback value with a captured source location.
    pub fn callback<F>(location: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Value + Send + Sync + 'static,
    {
        Value::Callback(Callback {
            f: Arc::new(f),
            location: location.into(),
        })
    }

    /// Build a send-time-evaluated value.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Value::Computed(Computed { f: Arc::new(f) })
    }

    /// Kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Date(_) => "date",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Callback(_) => "callback",
            Value::Computed(_) => "computed",
            Value::Promise(_) => "promise",
            Value::Remote(_) => "remote",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteObject> {
        match self {
            Value::Remote(r) => Some(r),
            _ => None,
        }
    }

    /// Snapshot a list value's elements.
    pub fn to_vec(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.lock().ok()?.clone()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Equality: primitives compare structurally, everything shared compares by
/// identity (same underlying allocation), which is what identity-stability
/// assertions need.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Callback(a), Value::Callback(b)) => Arc::ptr_eq(&a.f, &b.f),
            (Value::Computed(a), Value::Computed(b)) => Arc::ptr_eq(&a.f, &b.f),
            (Value::Promise(a), Value::Promise(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            (Value::Remote(a), Value::Remote(b)) => a.same_instance(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::Text(s) => write!(f, "Text({:?})", s),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Date(d) => write!(f, "Date({})", d),
            Value::List(items) => match items.lock() {
                Ok(items) => write!(f, "List(len={})", items.len()),
                Err(_) => write!(f, "List(<poisoned>)"),
            },
            Value::Object(obj) => match obj.lock() {
                Ok(obj) => write!(f, "Object({})", obj.class_name),
                Err(_) => write!(f, "Object(<poisoned>)"),
            },
            Value::Callback(cb) => write!(f, "Callback({})", cb.location),
            Value::Computed(_) => write!(f, "Computed"),
            Value::Promise(_) => write!(f, "Promise"),
            Value::Remote(r) => write!(f, "Remote({:?})", r),
        }
    }
}

/// A local function value plus its source location (for diagnostics on the
/// host side).
#[derive(Clone)]
pub struct Callback {
    pub(crate) f: Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>,
    pub location: String,
}

impl Callback {
    /// Invoke the callback with already-decoded arguments.
    pub fn invoke(&self, args: Vec<Value>) -> Value {
        (self.f)(args)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({})", self.location)
    }
}

/// A send-time-evaluated value producer.
#[derive(Clone)]
pub struct Computed {
    pub(crate) f: Arc<dyn Fn() -> Value + Send + Sync>,
}

impl Computed {
    pub fn evaluate(&self) -> Value {
        (self.f)()
    }
}

/// Outcome of a settled promise: fulfillment value or rejection value.
pub type Settlement = std::result::Result<Value, Value>;

enum PromiseState {
    Pending(Vec<Box<dyn FnOnce(Settlement) + Send>>),
    Settled(Settlement),
}

/// A local pending value.
///
/// Settles at most once; `resolve`/`reject` after settlement are no-ops.
/// Handlers subscribed while pending run inline on the settling thread.
#[derive(Clone)]
pub struct PromiseValue {
    inner: Arc<Mutex<PromiseState>>,
}

impl Default for PromiseValue {
    fn default() -> Self {
        Self::new()
    }
}

impl PromiseValue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PromiseState::Pending(Vec::new()))),
        }
    }

    /// Fulfill the promise. First settlement wins.
    pub fn resolve(&self, value: Value) {
        self.settle(Ok(value));
    }

    /// Reject the promise. First settlement wins.
    pub fn reject(&self, reason: Value) {
        self.settle(Err(reason));
    }

    fn settle(&self, outcome: Settlement) {
        let handlers = {
            let Ok(mut state) = self.inner.lock() else {
                return;
            };
            match &mut *state {
                PromiseState::Pending(handlers) => {
                    let handlers = std::mem::take(handlers);
                    *state = PromiseState::Settled(outcome.clone());
                    handlers
                }
                PromiseState::Settled(_) => return,
            }
        };
        for handler in handlers {
            handler(outcome.clone());
        }
    }

    /// Run `handler` when the promise settles (immediately if it already
    /// has).
    pub fn subscribe(&self, handler: Box<dyn FnOnce(Settlement) + Send>) {
        let outcome = {
            let Ok(mut state) = self.inner.lock() else {
                return;
            };
            match &mut *state {
                PromiseState::Pending(handlers) => {
                    handlers.push(handler);
                    return;
                }
                PromiseState::Settled(outcome) => outcome.clone(),
            }
        };
        handler(outcome);
    }

    /// The settlement, if any.
    pub fn settled(&self) -> Option<Settlement> {
        let state = self.inner.lock().ok()?;
        match &*state {
            PromiseState::Settled(outcome) => Some(outcome.clone()),
            PromiseState::Pending(_) => None,
        }
    }

    /// Wait asynchronously for settlement.
    pub async fn wait(&self) -> Settlement {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.subscribe(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        rx.await.unwrap_or(Err(Value::Text("promise dropped".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_equality_is_structural() {
        assert_eq!(Value::Number(5.0), Value::Number(5.0));
        assert_eq!(Value::from("abc"), Value::from("abc"));
        assert_ne!(Value::Number(5.0), Value::Text("5".to_string()));
    }

    #[test]
    fn test_shared_equality_is_identity() {
        let a = Value::list(vec![Value::Number(1.0)]);
        let b = a.clone();
        let c = Value::list(vec![Value::Number(1.0)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cyclic_object_is_constructible() {
        let obj = Value::object("Node", vec![]);
        if let Value::Object(cell) = &obj {
            cell.lock()
                .unwrap()
                .entries
                .push(("self".to_string(), obj.clone()));
        }
        // Reading back the cycle terminates.
        if let Value::Object(cell) = &obj {
            let inner = cell.lock().unwrap();
            assert_eq!(inner.entries[0].0, "self");
            assert_eq!(inner.entries[0].1, obj);
        }
    }

    #[test]
    fn test_promise_settles_once() {
        let p = PromiseValue::new();
        p.resolve(Value::Number(1.0));
        p.resolve(Value::Number(2.0));
        p.reject(Value::Text("late".to_string()));
        assert_eq!(p.settled(), Some(Ok(Value::Number(1.0))));
    }

    #[test]
    fn test_promise_subscribe_after_settlement_fires_immediately() {
        let p = PromiseValue::new();
        p.resolve(Value::Bool(true));

        let (tx, rx) = std::sync::mpsc::channel();
        p.subscribe(Box::new(move |outcome| {
            tx.send(outcome).unwrap();
        }));
        assert_eq!(rx.recv().unwrap(), Ok(Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_promise_wait() {
        let p = PromiseValue::new();
        let p2 = p.clone();
        tokio::spawn(async move {
            p2.resolve(Value::Number(7.0));
        });
        assert_eq!(p.wait().await, Ok(Value::Number(7.0)));
    }
}
