//! Host-side object registry and the objects it serves to clients.
//!
//! Every object handed to a client gets a registry id; the client addresses
//! all member operations by that id and reports unreachability with an
//! `object-released` notice, which removes the entry. Ids are stable per
//! object: registering the same object twice yields the same id, which is
//! what keeps client-side proxy identity coherent.

use crate::server::Notifier;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tether_core::events;
use tether_core::{Meta, Result, TetherError};
use tracing::debug;

/// A method or callable body: decoded client arguments in, host value out.
/// Failures surface to the client as exception metas.
pub type HostMethod = Arc<dyn Fn(Vec<HostValue>) -> Result<HostValue> + Send + Sync>;

/// Any value the host can serve to or accept from a client.
#[derive(Clone)]
pub enum HostValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Millisecond timestamp.
    Date(i64),
    List(Vec<HostValue>),
    /// Plain keyed data, serialized with fresh-value entries.
    Map(Vec<(String, HostValue)>),
    /// A registry-backed object served by reference.
    Object(Arc<HostObject>),
    /// A client function the host can invoke by id.
    Callback(ClientCallback),
    /// A structured error value (serialized as an `error` meta, not thrown).
    Error { name: String, message: String },
    /// A pending value; the inner object is its callable then-function.
    Promise(Arc<HostObject>),
}

impl HostValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// An immediately resolved promise over `value`.
    pub fn resolved_promise(value: HostValue) -> HostValue {
        let then = HostObject::builder("then")
            .callable(move |mut args| {
                if !args.is_empty() {
                    let on_fulfilled = args.remove(0);
                    if let HostValue::Callback(callback) = on_fulfilled {
                        callback.invoke(vec![value.clone()]);
                    }
                }
                Ok(HostValue::Null)
            })
            .build();
        HostValue::Promise(then)
    }

    /// An immediately rejected promise with `reason`.
    pub fn rejected_promise(reason: HostValue) -> HostValue {
        let then = HostObject::builder("then")
            .callable(move |mut args| {
                if args.len() > 1 {
                    let on_rejected = args.remove(1);
                    if let HostValue::Callback(callback) = on_rejected {
                        callback.invoke(vec![reason.clone()]);
                    }
                }
                Ok(HostValue::Null)
            })
            .build();
        HostValue::Promise(then)
    }
}

impl std::fmt::Debug for HostValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostValue::Null => write!(f, "Null"),
            HostValue::Bool(b) => write!(f, "Bool({})", b),
            HostValue::Number(n) => write!(f, "Number({})", n),
            HostValue::Text(s) => write!(f, "Text({:?})", s),
            HostValue::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            HostValue::Date(ms) => write!(f, "Date({})", ms),
            HostValue::List(items) => write!(f, "List(len={})", items.len()),
            HostValue::Map(entries) => write!(f, "Map(len={})", entries.len()),
            HostValue::Object(obj) => write!(f, "Object({})", obj.class_name()),
            HostValue::Callback(cb) => write!(f, "Callback(id={})", cb.id()),
            HostValue::Error { name, message } => write!(f, "Error({}: {})", name, message),
            HostValue::Promise(_) => write!(f, "Promise"),
        }
    }
}

/// One property of a [`HostObject`].
pub struct HostProperty {
    pub enumerable: bool,
    pub kind: HostPropertyKind,
}

pub enum HostPropertyKind {
    /// Accessor-backed data slot.
    Data {
        value: Mutex<HostValue>,
        writable: bool,
    },
    /// Invokable member.
    Method(HostMethod),
}

/// An object the host serves by reference.
///
/// The property table is fixed after construction; only `Data` slot values
/// mutate. A `callable` body makes the object function-shaped (serialized
/// as a `function` meta and invokable top-level).
pub struct HostObject {
    class_name: String,
    proto: Option<Arc<HostObject>>,
    properties: Vec<(String, HostProperty)>,
    callable: Option<HostMethod>,
}

impl HostObject {
    pub fn builder(class_name: impl Into<String>) -> HostObjectBuilder {
        HostObjectBuilder {
            class_name: class_name.into(),
            proto: None,
            properties: Vec::new(),
            callable: None,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn proto(&self) -> Option<&Arc<HostObject>> {
        self.proto.as_ref()
    }

    pub fn properties(&self) -> &[(String, HostProperty)] {
        &self.properties
    }

    pub fn callable(&self) -> Option<&HostMethod> {
        self.callable.as_ref()
    }

    pub fn is_callable(&self) -> bool {
        self.callable.is_some()
    }

    /// Look up a property on this object or its prototype chain.
    pub fn find_property(&self, name: &str) -> Option<&HostProperty> {
        if let Some((_, property)) = self.properties.iter().find(|(n, _)| n == name) {
            return Some(property);
        }
        self.proto.as_ref().and_then(|proto| proto.find_property(name))
    }
}

impl std::fmt::Debug for HostObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostObject")
            .field("class_name", &self.class_name)
            .field("properties", &self.properties.len())
            .field("callable", &self.callable.is_some())
            .finish()
    }
}

pub struct HostObjectBuilder {
    class_name: String,
    proto: Option<Arc<HostObject>>,
    properties: Vec<(String, HostProperty)>,
    callable: Option<HostMethod>,
}

impl HostObjectBuilder {
    pub fn proto(mut self, proto: Arc<HostObject>) -> Self {
        self.proto = Some(proto);
        self
    }

    /// Add an invokable member.
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Result<HostValue> + Send + Sync + 'static,
    {
        self.properties.push((
            name.into(),
            HostProperty {
                enumerable: true,
                kind: HostPropertyKind::Method(Arc::new(f)),
            },
        ));
        self
    }

    /// Add a read-only data property.
    pub fn data(self, name: impl Into<String>, value: HostValue) -> Self {
        self.data_slot(name, value, false)
    }

    /// Add a writable data property.
    pub fn writable_data(self, name: impl Into<String>, value: HostValue) -> Self {
        self.data_slot(name, value, true)
    }

    fn data_slot(mut self, name: impl Into<String>, value: HostValue, writable: bool) -> Self {
        self.properties.push((
            name.into(),
            HostProperty {
                enumerable: true,
                kind: HostPropertyKind::Data {
                    value: Mutex::new(value),
                    writable,
                },
            },
        ));
        self
    }

    /// Make the object function-shaped with the given call body.
    pub fn callable<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Result<HostValue> + Send + Sync + 'static,
    {
        self.callable = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Arc<HostObject> {
        Arc::new(HostObject {
            class_name: self.class_name,
            proto: self.proto,
            properties: self.properties,
            callable: self.callable,
        })
    }
}

/// Assigns registry ids to served objects and resolves them back.
#[derive(Default)]
pub struct ObjectsRegistry {
    next_id: AtomicU64,
    objects: Mutex<HashMap<u64, Arc<HostObject>>>,
    ids: Mutex<HashMap<usize, u64>>,
}

impl ObjectsRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            objects: Mutex::new(HashMap::new()),
            ids: Mutex::new(HashMap::new()),
        }
    }

    /// Register `object` and return its id. The same object registers under
    /// the same id as long as it is still held.
    pub fn add(&self, object: Arc<HostObject>) -> u64 {
        let key = Arc::as_ptr(&object) as usize;
        let (Ok(mut ids), Ok(mut objects)) = (self.ids.lock(), self.objects.lock()) else {
            return 0;
        };
        if let Some(&id) = ids.get(&key) {
            if objects.contains_key(&id) {
                return id;
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ids.insert(key, id);
        objects.insert(id, object);
        id
    }

    pub fn get(&self, id: u64) -> Option<Arc<HostObject>> {
        self.objects.lock().ok()?.get(&id).cloned()
    }

    /// Drop the object registered under `id`. Driven by the client's
    /// `object-released` notice.
    pub fn remove(&self, id: u64) {
        let removed = match self.objects.lock() {
            Ok(mut objects) => objects.remove(&id),
            Err(_) => None,
        };
        if let Some(object) = removed {
            let key = Arc::as_ptr(&object) as usize;
            if let Ok(mut ids) = self.ids.lock() {
                ids.remove(&key);
            }
            debug!("Released object {} ({})", id, object.class_name());
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct ClientCallbackInner {
    id: u64,
    notifier: Notifier,
}

impl Drop for ClientCallbackInner {
    fn drop(&mut self) {
        // Last host reference gone: let the client unregister its function.
        self.notifier
            .notify(events::CALLBACK_RELEASE, vec![serde_json::json!(self.id)]);
    }
}

/// A client-registered function the host holds by id.
///
/// Invocation is fire-and-forget: it pushes a `callback-invoke`
/// notification. Dropping the last host reference pushes
/// `callback-release`.
#[derive(Clone)]
pub struct ClientCallback {
    inner: Arc<ClientCallbackInner>,
    registry: Arc<ObjectsRegistry>,
}

impl ClientCallback {
    pub(crate) fn new(id: u64, notifier: Notifier, registry: Arc<ObjectsRegistry>) -> Self {
        Self {
            inner: Arc::new(ClientCallbackInner { id, notifier }),
            registry,
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Invoke the client function with `args`.
    pub fn invoke(&self, args: Vec<HostValue>) {
        let metas: Vec<Meta> = args
            .iter()
            .map(|arg| crate::serialize::host_to_meta(&self.registry, arg))
            .collect();
        let params = match serde_json::to_value(&metas) {
            Ok(params) => params,
            Err(e) => {
                debug!("Unserializable callback arguments for id {}: {}", self.inner.id, e);
                return;
            }
        };
        self.inner.notifier.notify(
            events::CALLBACK_INVOKE,
            vec![serde_json::json!(self.inner.id), params],
        );
    }
}

/// Host-side failure that travels to the client as an exception meta.
pub fn exception(message: impl Into<String>) -> TetherError {
    TetherError::RemoteException {
        message: message.into(),
        stack: "at host".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> Arc<HostObject> {
        HostObject::builder("Leaf")
            .data("kind", HostValue::Text("leaf".to_string()))
            .build()
    }

    #[test]
    fn test_registry_ids_are_stable_per_object() {
        let registry = ObjectsRegistry::new();
        let object = leaf();
        let a = registry.add(object.clone());
        let b = registry.add(object);
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_objects_get_distinct_ids() {
        let registry = ObjectsRegistry::new();
        let a = registry.add(leaf());
        let b = registry.add(leaf());
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_frees_the_entry() {
        let registry = ObjectsRegistry::new();
        let object = leaf();
        let id = registry.add(object.clone());
        registry.remove(id);
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());

        // Re-registering after release assigns a fresh id.
        let fresh = registry.add(object);
        assert_ne!(fresh, id);
    }

    #[test]
    fn test_find_property_walks_prototype_chain() {
        let base = HostObject::builder("Base")
            .method("emit", |_| Ok(HostValue::Null))
            .build();
        let derived = HostObject::builder("Derived")
            .proto(base)
            .data("name", HostValue::Text("d".to_string()))
            .build();

        assert!(derived.find_property("name").is_some());
        assert!(derived.find_property("emit").is_some());
        assert!(derived.find_property("missing").is_none());
    }
}
