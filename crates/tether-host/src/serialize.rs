//! Host-side meta serialization.
//!
//! Registry-backed objects serialize by reference: a meta carrying the
//! registry id plus property descriptors and the prototype chain, never the
//! property values themselves. Plain data serializes inline. Client
//! argument metas decode the other way: a `function` meta becomes an
//! invokable [`ClientCallback`], a `remote-object` meta resolves through
//! the registry.

use crate::objects::{
    ClientCallback, HostObject, HostProperty, HostPropertyKind, HostValue, ObjectsRegistry,
};
use crate::server::Notifier;
use std::sync::Arc;
use tether_core::{
    MemberKind, Meta, MetaMember, ObjectMember, PlainMember, ProtoMeta, Result, TetherError,
};
use tracing::warn;

/// Serialize a host value for the client.
pub fn host_to_meta(registry: &Arc<ObjectsRegistry>, value: &HostValue) -> Meta {
    match value {
        HostValue::Null => Meta::null(),
        HostValue::Bool(b) => Meta::Value {
            value: serde_json::json!(b),
        },
        HostValue::Number(n) => Meta::Value {
            value: serde_json::json!(n),
        },
        HostValue::Text(s) => Meta::Value {
            value: serde_json::json!(s),
        },
        HostValue::Bytes(bytes) => Meta::Buffer {
            value: bytes.clone(),
        },
        HostValue::Date(ms) => Meta::Date { value: *ms },
        HostValue::List(items) => Meta::Array {
            members: items
                .iter()
                .map(|item| host_to_meta(registry, item))
                .collect(),
        },
        HostValue::Map(entries) => Meta::Object {
            id: None,
            name: "Object".to_string(),
            members: entries
                .iter()
                .map(|(name, value)| MetaMember::Entry {
                    name: name.clone(),
                    value: host_to_meta(registry, value),
                })
                .collect(),
            proto: None,
        },
        HostValue::Object(object) => object_to_meta(registry, object),
        HostValue::Callback(callback) => {
            // The client's own function has no host-side serialization.
            warn!(
                "Cannot serve client callback {} back to the client",
                callback.id()
            );
            Meta::null()
        }
        HostValue::Error { name, message } => Meta::Error {
            name: name.clone(),
            members: vec![PlainMember {
                name: "message".to_string(),
                value: serde_json::json!(message),
            }],
        },
        HostValue::Promise(then) => Meta::Promise {
            then: Box::new(object_to_meta(registry, then)),
        },
    }
}

fn object_to_meta(registry: &Arc<ObjectsRegistry>, object: &Arc<HostObject>) -> Meta {
    let id = registry.add(object.clone());
    let members = descriptors(object.properties());
    let proto = proto_chain(object.proto());

    if object.is_callable() {
        Meta::Function {
            id,
            location: None,
            name: object.class_name().to_string(),
            members,
            proto,
        }
    } else {
        Meta::Object {
            id: Some(id),
            name: object.class_name().to_string(),
            members,
            proto,
        }
    }
}

fn descriptors(properties: &[(String, HostProperty)]) -> Vec<MetaMember> {
    properties
        .iter()
        .map(|(name, property)| {
            let (kind, writable) = match &property.kind {
                HostPropertyKind::Method(_) => (MemberKind::Method, false),
                HostPropertyKind::Data { writable, .. } => (MemberKind::Get, *writable),
            };
            MetaMember::Descriptor(ObjectMember {
                name: name.clone(),
                kind,
                enumerable: property.enumerable,
                writable,
            })
        })
        .collect()
}

fn proto_chain(proto: Option<&Arc<HostObject>>) -> Option<Box<ProtoMeta>> {
    let proto = proto?;
    Some(Box::new(ProtoMeta {
        members: descriptors(proto.properties()),
        proto: proto_chain(proto.proto()),
    }))
}

/// Decode a client argument meta.
pub fn meta_to_host(
    registry: &Arc<ObjectsRegistry>,
    notifier: &Notifier,
    meta: &Meta,
) -> Result<HostValue> {
    match meta {
        Meta::Value { value } => Ok(json_to_host(value)),
        Meta::Array { members } => Ok(HostValue::List(
            members
                .iter()
                .map(|member| meta_to_host(registry, notifier, member))
                .collect::<Result<Vec<_>>>()?,
        )),
        Meta::Buffer { value } => Ok(HostValue::Bytes(value.clone())),
        Meta::Date { value } => Ok(HostValue::Date(*value)),
        // A client promise arrives as its then-function; the host consumes
        // it by invoking that with its own settlement callbacks.
        Meta::Promise { then } => meta_to_host(registry, notifier, then),
        Meta::Error { name, members } => Ok(HostValue::Error {
            name: name.clone(),
            message: members
                .iter()
                .find(|member| member.name == "message")
                .and_then(|member| member.value.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        Meta::Exception { message, .. } => Ok(HostValue::Error {
            name: "Error".to_string(),
            message: message.clone(),
        }),
        Meta::RemoteObject { id } => registry
            .get(*id)
            .map(HostValue::Object)
            .ok_or_else(|| TetherError::Protocol {
                message: format!("unknown object id in argument: {}", id),
            }),
        Meta::Object { id: None, members, .. } => {
            let mut entries = Vec::new();
            for member in members {
                match member {
                    MetaMember::Entry { name, value } => {
                        entries.push((name.clone(), meta_to_host(registry, notifier, value)?));
                    }
                    MetaMember::Descriptor(descriptor) => {
                        warn!(
                            "Dropping descriptor member {:?} in client argument",
                            descriptor.name
                        );
                    }
                }
            }
            Ok(HostValue::Map(entries))
        }
        Meta::Object { id: Some(id), .. } => registry
            .get(*id)
            .map(HostValue::Object)
            .ok_or_else(|| TetherError::Protocol {
                message: format!("unknown object id in argument: {}", id),
            }),
        Meta::Function { id, .. } => Ok(HostValue::Callback(ClientCallback::new(
            *id,
            notifier.clone(),
            registry.clone(),
        ))),
        Meta::FunctionWithReturnValue { value } => meta_to_host(registry, notifier, value),
    }
}

fn json_to_host(json: &serde_json::Value) -> HostValue {
    match json {
        serde_json::Value::Null => HostValue::Null,
        serde_json::Value::Bool(b) => HostValue::Bool(*b),
        serde_json::Value::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => HostValue::Text(s.clone()),
        serde_json::Value::Array(items) => {
            HostValue::List(items.iter().map(json_to_host).collect())
        }
        serde_json::Value::Object(map) => HostValue::Map(
            map.iter()
                .map(|(name, value)| (name.clone(), json_to_host(value)))
                .collect(),
        ),
    }
}
