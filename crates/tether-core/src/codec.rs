//! Translation between in-process [`Value`]s and wire [`Meta`]s.
//!
//! Encoding walks a value graph with a pointer-identity visited set so a
//! cyclic or self-referential container terminates: any container reached
//! again while still on the encoding path is truncated to a null meta.
//!
//! Decoding is identity-preserving for host-owned objects: any meta carrying
//! a host id consults the object cache first, so the same id always yields
//! the same proxy instance while one is alive.

use crate::context::RemoteContext;
use crate::error::{Result, TetherError};
use crate::meta::{Meta, MetaMember, PlainMember};
use crate::proxy::RemoteObject;
use crate::value::{ObjectValue, PromiseValue, Value};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashSet;
use tracing::warn;

// ----------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------

/// Encode an argument list for transmission.
pub(crate) fn wrap_args(ctx: &RemoteContext, args: &[Value]) -> Vec<Meta> {
    let mut visited = HashSet::new();
    args.iter()
        .map(|arg| value_to_meta(ctx, arg, &mut visited))
        .collect()
}

/// Pointer-identity key for shared containers; non-containers have none.
fn container_key(value: &Value) -> Option<usize> {
    match value {
        Value::List(items) => Some(std::sync::Arc::as_ptr(items) as *const () as usize),
        Value::Object(obj) => Some(std::sync::Arc::as_ptr(obj) as *const () as usize),
        _ => None,
    }
}

pub(crate) fn value_to_meta(
    ctx: &RemoteContext,
    value: &Value,
    visited: &mut HashSet<usize>,
) -> Meta {
    if let Some(key) = container_key(value) {
        if visited.contains(&key) {
            return Meta::null();
        }
    }

    match value {
        Value::Null => Meta::null(),
        Value::Bool(b) => Meta::Value { value: json!(b) },
        Value::Number(n) => Meta::Value { value: json!(n) },
        Value::Text(s) => Meta::Value { value: json!(s) },
        Value::Bytes(bytes) => Meta::Buffer {
            value: bytes.to_vec(),
        },
        Value::Date(date) => Meta::Date {
            value: date.timestamp_millis(),
        },
        Value::List(items) => {
            let key = std::sync::Arc::as_ptr(items) as *const () as usize;
            visited.insert(key);
            let members = match items.lock() {
                Ok(items) => items
                    .iter()
                    .map(|item| value_to_meta(ctx, item, visited))
                    .collect(),
                Err(_) => Vec::new(),
            };
            visited.remove(&key);
            Meta::Array { members }
        }
        Value::Object(obj) => {
            let key = std::sync::Arc::as_ptr(obj) as *const () as usize;
            visited.insert(key);
            let meta = match obj.lock() {
                Ok(obj) => Meta::Object {
                    id: None,
                    name: obj.class_name.clone(),
                    members: obj
                        .entries
                        .iter()
                        .map(|(name, value)| MetaMember::Entry {
                            name: name.clone(),
                            value: value_to_meta(ctx, value, visited),
                        })
                        .collect(),
                    proto: None,
                },
                Err(_) => Meta::null(),
            };
            visited.remove(&key);
            meta
        }
        Value::Callback(callback) => {
            let id = ctx.callbacks().add(callback.clone());
            Meta::Function {
                id,
                location: Some(callback.location.clone()),
                name: String::new(),
                members: Vec::new(),
                proto: None,
            }
        }
        Value::Computed(computed) => Meta::FunctionWithReturnValue {
            value: Box::new(value_to_meta(ctx, &computed.evaluate(), visited)),
        },
        Value::Promise(promise) => Meta::Promise {
            then: Box::new(value_to_meta(ctx, &promise_then(ctx, promise), visited)),
        },
        Value::Remote(proxy) => match proxy.remote_id() {
            Some(id) => Meta::RemoteObject { id },
            // A proxy that never acquired an id (a member function whose
            // lazy fetch has not run) still round-trips as a callable.
            None => {
                let wrapper = reinvoke_callback(proxy);
                value_to_meta(ctx, &wrapper, visited)
            }
        },
    }
}

/// Callback implementing promise settlement across the boundary: the host
/// invokes it with its own fulfillment and rejection handlers, and whichever
/// matches the local settlement is invoked with the settled value.
fn promise_then(ctx: &RemoteContext, promise: &PromiseValue) -> Value {
    let ctx = ctx.clone();
    let promise = promise.clone();
    Value::callback("<promise-then>", move |args| {
        let mut args = args.into_iter();
        let on_fulfilled = args.next().unwrap_or(Value::Null);
        let on_rejected = args.next().unwrap_or(Value::Null);
        let ctx = ctx.clone();
        promise.subscribe(Box::new(move |outcome| {
            let (handler, settled) = match outcome {
                Ok(value) => (on_fulfilled, value),
                Err(reason) => (on_rejected, reason),
            };
            if handler.is_null() {
                return;
            }
            tokio::spawn(async move {
                if let Err(e) = ctx.invoke_value(&handler, vec![settled]).await {
                    warn!("Promise settlement handler failed: {}", e);
                }
            });
        }));
        Value::Null
    })
}

/// Wrap an id-less proxy as a freshly registered callback that forwards an
/// invocation back through the proxy.
fn reinvoke_callback(proxy: &RemoteObject) -> Value {
    let proxy = proxy.clone();
    Value::callback("<remote-method>", move |args| {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            if let Err(e) = proxy.invoke(&args).await {
                warn!("Forwarded remote invocation failed: {}", e);
            }
        });
        Value::Null
    })
}

// ----------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------

pub(crate) fn meta_to_value(ctx: &RemoteContext, meta: &Meta) -> Result<Value> {
    match meta {
        Meta::Value { value } => Ok(json_to_value(value)),
        Meta::Array { members } => {
            let items = members
                .iter()
                .map(|member| meta_to_value(ctx, member))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::list(items))
        }
        Meta::Buffer { value } => Ok(Value::Bytes(Bytes::from(value.clone()))),
        Meta::Date { value } => Utc
            .timestamp_millis_opt(*value)
            .single()
            .map(Value::Date)
            .ok_or_else(|| TetherError::Protocol {
                message: format!("date meta out of range: {}", value),
            }),
        Meta::Promise { then } => {
            let then_fn = meta_to_value(ctx, then)?;
            let promise = PromiseValue::new();
            let resolver = promise.clone();
            let on_fulfilled = Value::callback("<promise-resolve>", move |mut args| {
                resolver.resolve(args.drain(..).next().unwrap_or(Value::Null));
                Value::Null
            });
            let rejecter = promise.clone();
            let on_rejected = Value::callback("<promise-reject>", move |mut args| {
                rejecter.reject(args.drain(..).next().unwrap_or(Value::Null));
                Value::Null
            });
            let ctx = ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = ctx
                    .invoke_value(&then_fn, vec![on_fulfilled, on_rejected])
                    .await
                {
                    warn!("Remote promise wiring failed: {}", e);
                }
            });
            Ok(Value::Promise(promise))
        }
        Meta::Error { name, members } => Ok(plain_error_object(name, members)),
        Meta::Exception { message, stack } => Err(TetherError::RemoteException {
            message: message.clone(),
            stack: stack.clone(),
        }),
        Meta::RemoteObject { id } => {
            if let Some(proxy) = ctx.cache().get(*id) {
                return Ok(Value::Remote(proxy));
            }
            // Reference to an id with no live proxy: construct an empty
            // object proxy under that id. Members resolve lazily through
            // round trips as needed.
            let proxy = RemoteObject::new_object(ctx.clone(), Some(*id), "Object");
            ctx.cache().set(*id, &proxy);
            Ok(Value::Remote(proxy))
        }
        Meta::Object {
            id: Some(id),
            name,
            members,
            proto,
        } => decode_host_object(ctx, *id, name, false, members, proto.as_deref()),
        Meta::Object {
            id: None,
            name,
            members,
            ..
        } => {
            // Host-sent object without an id: reconstruct as a plain local
            // object from its fresh-value entries.
            let mut entries = Vec::new();
            for member in members {
                match member {
                    MetaMember::Entry { name, value } => {
                        entries.push((name.clone(), meta_to_value(ctx, value)?));
                    }
                    MetaMember::Descriptor(descriptor) => {
                        warn!(
                            "Dropping descriptor member {:?} on an id-less object meta",
                            descriptor.name
                        );
                    }
                }
            }
            Ok(Value::object(name.clone(), entries))
        }
        Meta::Function {
            id,
            name,
            members,
            proto,
            ..
        } => decode_host_object(ctx, *id, name, true, members, proto.as_deref()),
        Meta::FunctionWithReturnValue { value } => meta_to_value(ctx, value),
    }
}

fn decode_host_object(
    ctx: &RemoteContext,
    id: u64,
    name: &str,
    is_function: bool,
    members: &[MetaMember],
    proto: Option<&crate::meta::ProtoMeta>,
) -> Result<Value> {
    if let Some(existing) = ctx.cache().get(id) {
        return Ok(Value::Remote(existing));
    }
    let proxy = if is_function {
        RemoteObject::new_function(ctx.clone(), id, name)
    } else {
        RemoteObject::new_object(ctx.clone(), Some(id), name)
    };
    // Register before installing members so self-referential metas resolve
    // to this instance instead of recursing.
    ctx.cache().set(id, &proxy);
    proxy.install_members(members)?;
    proxy.install_prototype(proto)?;
    Ok(Value::Remote(proxy))
}

fn plain_error_object(name: &str, members: &[PlainMember]) -> Value {
    let class_name = if name.is_empty() { "Error" } else { name };
    let entries = members
        .iter()
        .map(|member| (member.name.clone(), json_to_value(&member.value)))
        .collect();
    Value::object(class_name, entries)
}

/// Lenient translation of raw JSON into the value universe, used for `value`
/// metas and `error` member payloads.
pub(crate) fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::list(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            let entries = map
                .iter()
                .map(|(name, value)| (name.clone(), json_to_value(value)))
                .collect();
            Value::Object(std::sync::Arc::new(std::sync::Mutex::new(ObjectValue {
                class_name: "Object".to_string(),
                entries,
            })))
        }
    }
}
