//! Wire descriptors ("metas") for values crossing the process boundary.
//!
//! Every argument and result exchanged with the host travels as a [`Meta`]:
//! an internally tagged union serialized as JSON, e.g.
//! `{"type":"value","value":42}` or `{"type":"remote-object","id":7}`.
//!
//! Two member shapes share the `object`/`function` kinds depending on
//! direction: fresh objects sent *to* the host carry `{name, value}` entries
//! with nested metas, while objects received *from* the host carry property
//! descriptors (`method` or `get`) that the member installer wires to round
//! trips. [`MetaMember`] covers both.

use serde::{Deserialize, Serialize};

/// Tagged wire representation of a value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Meta {
    /// Any JSON primitive, or null for a truncated cycle.
    Value { value: serde_json::Value },

    /// Ordered sequence of nested descriptors.
    Array { members: Vec<Meta> },

    /// Binary payload, copied inline.
    Buffer { value: Vec<u8> },

    /// Millisecond timestamp.
    Date { value: i64 },

    /// Pending value; `then` describes the callback that drives settlement.
    Promise { then: Box<Meta> },

    /// A structured error value (not thrown on decode).
    Error {
        #[serde(default)]
        name: String,
        #[serde(default)]
        members: Vec<PlainMember>,
    },

    /// A thrown host-side failure; decoding this raises locally.
    Exception { message: String, stack: String },

    /// Reference to an object that already has a proxy on the other side.
    RemoteObject { id: u64 },

    /// An object: constructor display name plus member list. Host-assigned
    /// `id` is present when the host owns the object.
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        #[serde(default)]
        name: String,
        #[serde(default)]
        members: Vec<MetaMember>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proto: Option<Box<ProtoMeta>>,
    },

    /// A function. Toward the host, `id` is a callback-registry id and
    /// `location` the captured source location; from the host, `id` is the
    /// host object id and `members`/`proto` describe its own properties.
    Function {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        #[serde(default)]
        name: String,
        #[serde(default)]
        members: Vec<MetaMember>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proto: Option<Box<ProtoMeta>>,
    },

    /// Marker: the sender evaluated a zero-argument function at send time
    /// and this wraps the meta of its result.
    FunctionWithReturnValue { value: Box<Meta> },
}

impl Meta {
    /// Null `value` meta, used for cycle truncation.
    pub fn null() -> Self {
        Meta::Value {
            value: serde_json::Value::Null,
        }
    }

    /// Kind tag as it appears on the wire, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Meta::Value { .. } => "value",
            Meta::Array { .. } => "array",
            Meta::Buffer { .. } => "buffer",
            Meta::Date { .. } => "date",
            Meta::Promise { .. } => "promise",
            Meta::Error { .. } => "error",
            Meta::Exception { .. } => "exception",
            Meta::RemoteObject { .. } => "remote-object",
            Meta::Object { .. } => "object",
            Meta::Function { .. } => "function",
            Meta::FunctionWithReturnValue { .. } => "function-with-return-value",
        }
    }
}

/// One member of an `object`/`function` meta.
///
/// Untagged: descriptors carry a `type` field, fresh-value entries carry a
/// nested `value` meta. Variant order matters: `Descriptor` must be tried
/// first since only it requires `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetaMember {
    Descriptor(ObjectMember),
    Entry { name: String, value: Meta },
}

/// Descriptor for one remote-backed property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectMember {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MemberKind,
    #[serde(default = "default_true")]
    pub enumerable: bool,
    /// Only meaningful for `get` members; a setter is installed only when
    /// the host reports the property writable.
    #[serde(default)]
    pub writable: bool,
}

fn default_true() -> bool {
    true
}

/// Whether a member is invoked via round trip or read via accessor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MemberKind {
    Method,
    Get,
}

/// One link of a prototype chain descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtoMeta {
    #[serde(default)]
    pub members: Vec<MetaMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<Box<ProtoMeta>>,
}

/// A `{name, value}` pair with a plain (non-meta) value, used by `error`
/// metas which reconstruct as plain structured objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlainMember {
    pub name: String,
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_meta_wire_shape() {
        let meta = Meta::Value {
            value: serde_json::json!(42),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, serde_json::json!({"type": "value", "value": 42}));
    }

    #[test]
    fn test_remote_object_tag_is_kebab_case() {
        let meta = Meta::RemoteObject { id: 7 };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"remote-object\""));

        let parsed: Meta = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_object_meta_with_descriptors_roundtrip() {
        let meta = Meta::Object {
            id: Some(3),
            name: "BrowserWindow".to_string(),
            members: vec![
                MetaMember::Descriptor(ObjectMember {
                    name: "focus".to_string(),
                    kind: MemberKind::Method,
                    enumerable: true,
                    writable: false,
                }),
                MetaMember::Descriptor(ObjectMember {
                    name: "id".to_string(),
                    kind: MemberKind::Get,
                    enumerable: true,
                    writable: false,
                }),
            ],
            proto: Some(Box::new(ProtoMeta {
                members: vec![MetaMember::Descriptor(ObjectMember {
                    name: "emit".to_string(),
                    kind: MemberKind::Method,
                    enumerable: false,
                    writable: false,
                })],
                proto: None,
            })),
        };

        let json = serde_json::to_string(&meta).unwrap();
        let parsed: Meta = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_entry_members_distinguished_from_descriptors() {
        let json = serde_json::json!({
            "type": "object",
            "name": "Object",
            "members": [
                {"name": "width", "value": {"type": "value", "value": 800}}
            ]
        });
        let meta: Meta = serde_json::from_value(json).unwrap();
        match meta {
            Meta::Object { id, members, .. } => {
                assert!(id.is_none());
                assert!(matches!(
                    members[0],
                    MetaMember::Entry { ref name, .. } if name == "width"
                ));
            }
            other => panic!("Expected object meta, got: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_tag_fails_decoding() {
        let json = serde_json::json!({"type": "hologram", "value": 1});
        let result: std::result::Result<Meta, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_exception_meta_roundtrip() {
        let meta = Meta::Exception {
            message: "boom".to_string(),
            stack: "at f (host.js:1)".to_string(),
        };
        let json = serde_json::to_string(&meta).unwrap();
        let parsed: Meta = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_function_meta_toward_host_carries_location() {
        let meta = Meta::Function {
            id: 12,
            location: Some("app.rs:40".to_string()),
            name: String::new(),
            members: Vec::new(),
            proto: None,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["id"], 12);
        assert_eq!(json["location"], "app.rs:40");
        assert!(json.get("proto").is_none());
    }
}
