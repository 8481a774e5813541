//! Local proxies standing in for objects that live in the host process.
//!
//! A [`RemoteObject`] is a cheap clonable handle; all clones share one
//! underlying proxy. Property reads, writes, method calls, and constructor
//! calls translate into round trips over the owning context's channel.
//!
//! Members are explicit slots installed from wire descriptors rather than
//! language-level dynamic dispatch, and the prototype chain is an explicit
//! linked list of records resolved during lookup. Function-shaped proxies
//! that stand in for a *member* of another object populate their own
//! members lazily: the first access that misses triggers a single
//! member-get fetch, subsequent misses resolve locally.
//!
//! When the last handle to a proxy drops, its host id is queued for a
//! one-way `object-released` notice so the host can drop its side.

use crate::channel::requests;
use crate::context::RemoteContext;
use crate::error::{Result, TetherError};
use crate::meta::{Meta, MemberKind, MetaMember, ProtoMeta};
use crate::value::Value;
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// What this proxy stands in for.
#[derive(Debug, Clone)]
pub(crate) enum ProxyKind {
    /// A plain host object.
    Object,
    /// A top-level host function (its members arrive with its meta).
    Function,
    /// A member function of another host object; `owner` is the receiver's
    /// host id and is internal bookkeeping, never a remote-backed property.
    Method { owner: u64, name: String },
}

/// One installed member slot.
#[derive(Clone)]
pub(crate) enum MemberSlot {
    /// Remote-backed method; the function proxy is created at install time
    /// so repeated reads observe the same instance.
    Method { enumerable: bool, func: RemoteObject },
    /// Remote-backed accessor. A setter exists only when `writable`.
    Accessor { enumerable: bool, writable: bool },
    /// Locally stored value: an expando property or a monkey-patched method.
    Local { enumerable: bool, value: Value },
}

impl MemberSlot {
    fn enumerable(&self) -> bool {
        match self {
            MemberSlot::Method { enumerable, .. }
            | MemberSlot::Accessor { enumerable, .. }
            | MemberSlot::Local { enumerable, .. } => *enumerable,
        }
    }
}

/// One link of the mirrored prototype chain.
pub(crate) struct ProtoLink {
    members: Vec<(String, MemberSlot)>,
    next: Option<Box<ProtoLink>>,
}

pub(crate) struct RemoteObjectInner {
    ctx: RemoteContext,
    kind: ProxyKind,
    /// Host-assigned id. Set at construction for decoded objects and
    /// functions; set on first lazy fetch for member-function proxies.
    id: Mutex<Option<u64>>,
    class_name: Mutex<String>,
    members: Mutex<Vec<(String, MemberSlot)>>,
    proto: Mutex<Option<ProtoLink>>,
    /// Lazy-fetch guard; held across the fetch so concurrent accesses wait
    /// instead of double-fetching.
    loaded: tokio::sync::Mutex<bool>,
}

impl Drop for RemoteObjectInner {
    fn drop(&mut self) {
        // Last handle gone: tell the host it may release its side. The
        // notice is queued and forwarded off this thread; failures are
        // logged, never raised (there is no caller on a drop path).
        let id = self.id.get_mut().map(|id| *id).unwrap_or(None);
        if let Some(id) = id {
            self.ctx.queue_release(id);
        }
    }
}

impl fmt::Debug for RemoteObjectInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id.lock().map(|id| *id).unwrap_or(None);
        f.debug_struct("RemoteObject")
            .field("kind", &self.kind)
            .field("id", &id)
            .finish()
    }
}

/// Handle to a proxy for a host-side object.
#[derive(Clone)]
pub struct RemoteObject {
    inner: Arc<RemoteObjectInner>,
    /// Set on member-function handles handed out by a property read: keeps
    /// the receiver proxy alive for as long as this handle is held, so the
    /// member function never outlives the object it addresses. Never set on
    /// the instance stored in the receiver's own member table; that would
    /// form an `Arc` cycle and suppress release for both.
    receiver: Option<Arc<RemoteObjectInner>>,
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl RemoteObject {
    fn new(ctx: RemoteContext, kind: ProxyKind, id: Option<u64>, class_name: String) -> Self {
        let loaded = !matches!(kind, ProxyKind::Method { .. });
        Self {
            inner: Arc::new(RemoteObjectInner {
                ctx,
                kind,
                id: Mutex::new(id),
                class_name: Mutex::new(class_name),
                members: Mutex::new(Vec::new()),
                proto: Mutex::new(None),
                loaded: tokio::sync::Mutex::new(loaded),
            }),
            receiver: None,
        }
    }

    pub(crate) fn new_object(ctx: RemoteContext, id: Option<u64>, class_name: &str) -> Self {
        Self::new(ctx, ProxyKind::Object, id, class_name.to_string())
    }

    pub(crate) fn new_function(ctx: RemoteContext, id: u64, class_name: &str) -> Self {
        Self::new(ctx, ProxyKind::Function, Some(id), class_name.to_string())
    }

    pub(crate) fn new_method(ctx: RemoteContext, owner: u64, name: &str) -> Self {
        Self::new(
            ctx,
            ProxyKind::Method {
                owner,
                name: name.to_string(),
            },
            None,
            String::new(),
        )
    }

    pub(crate) fn from_inner(inner: Arc<RemoteObjectInner>) -> Self {
        Self {
            inner,
            receiver: None,
        }
    }

    fn with_receiver(&self, receiver: &Arc<RemoteObjectInner>) -> Self {
        Self {
            inner: self.inner.clone(),
            receiver: Some(receiver.clone()),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RemoteObjectInner> {
        Arc::downgrade(&self.inner)
    }

    /// Whether two handles refer to the same proxy instance.
    pub fn same_instance(&self, other: &RemoteObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Host-assigned id, if this proxy has one yet.
    pub fn remote_id(&self) -> Option<u64> {
        self.inner.id.lock().map(|id| *id).unwrap_or(None)
    }

    /// Constructor display name reported by the host.
    pub fn class_name(&self) -> String {
        self.inner
            .class_name
            .lock()
            .map(|name| name.clone())
            .unwrap_or_default()
    }

    /// Whether this proxy is callable.
    pub fn is_function(&self) -> bool {
        !matches!(self.inner.kind, ProxyKind::Object)
    }

    fn require_id(&self) -> Result<u64> {
        self.remote_id().ok_or_else(|| TetherError::Protocol {
            message: "proxy has no host-assigned id".to_string(),
        })
    }

    // ------------------------------------------------------------------
    // Member installation
    // ------------------------------------------------------------------

    /// Install `members` without clobbering any slot already present,
    /// including locally written ones. Safe to call repeatedly.
    pub(crate) fn install_members(&self, members: &[MetaMember]) -> Result<()> {
        let owner = self.remote_id();
        let slots: Vec<(String, MemberSlot)> = members
            .iter()
            .filter_map(|member| build_slot(&self.inner.ctx, owner, member))
            .collect::<Result<Vec<_>>>()?;

        let mut table = match self.inner.members.lock() {
            Ok(table) => table,
            Err(_) => return Ok(()),
        };
        for (name, slot) in slots {
            if table.iter().any(|(existing, _)| *existing == name) {
                continue;
            }
            table.push((name, slot));
        }
        Ok(())
    }

    /// Mirror the remote prototype chain, link by link. Chain members
    /// resolve round trips against this proxy's id, matching the host's
    /// member addressing.
    pub(crate) fn install_prototype(&self, proto: Option<&ProtoMeta>) -> Result<()> {
        let Some(proto) = proto else {
            return Ok(());
        };
        let owner = self.remote_id();
        let link = build_link(&self.inner.ctx, owner, proto)?;
        if let Ok(mut slot) = self.inner.proto.lock() {
            if slot.is_none() {
                *slot = Some(link);
            }
        }
        Ok(())
    }

    pub(crate) fn set_class_name(&self, name: &str) {
        if let Ok(mut class_name) = self.inner.class_name.lock() {
            *class_name = name.to_string();
        }
    }

    fn find_slot(&self, name: &str) -> Option<MemberSlot> {
        if let Ok(table) = self.inner.members.lock() {
            if let Some((_, slot)) = table.iter().find(|(n, _)| n == name) {
                return Some(slot.clone());
            }
        }
        let proto = self.inner.proto.lock().ok()?;
        let mut link = proto.as_ref();
        while let Some(current) = link {
            if let Some((_, slot)) = current.members.iter().find(|(n, _)| n == name) {
                return Some(slot.clone());
            }
            link = current.next.as_deref();
        }
        None
    }

    fn put_local(&self, name: &str, value: Value) {
        if let Ok(mut table) = self.inner.members.lock() {
            if let Some((_, slot)) = table.iter_mut().find(|(n, _)| n == name) {
                let enumerable = slot.enumerable();
                *slot = MemberSlot::Local { enumerable, value };
            } else {
                table.push((
                    name.to_string(),
                    MemberSlot::Local {
                        enumerable: true,
                        value,
                    },
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // Lazy member loading (member-function proxies only)
    // ------------------------------------------------------------------

    /// Fetch and install this function's own members, at most once per
    /// proxy instance. Returns whether a fetch was performed.
    async fn ensure_members_loaded(&self) -> Result<bool> {
        let ProxyKind::Method { owner, name } = &self.inner.kind else {
            return Ok(false);
        };
        let mut loaded = self.inner.loaded.lock().await;
        if *loaded {
            return Ok(false);
        }
        // One fetch per instance, even if it fails.
        *loaded = true;

        let meta = self
            .inner
            .ctx
            .channel()
            .round_trip(requests::MEMBER_GET, vec![json!(owner), json!(name)])
            .await?;

        match meta {
            Meta::Function {
                id,
                name: class_name,
                members,
                proto,
                ..
            } => {
                self.adopt_identity(id, &class_name);
                self.install_members(&members)?;
                self.install_prototype(proto.as_deref())?;
            }
            Meta::Object {
                id: Some(id),
                name: class_name,
                members,
                proto,
            } => {
                self.adopt_identity(id, &class_name);
                self.install_members(&members)?;
                self.install_prototype(proto.as_deref())?;
            }
            other => {
                debug!(
                    "Member {} of object {} has no own members (got {} meta)",
                    name,
                    owner,
                    other.kind()
                );
            }
        }
        Ok(true)
    }

    fn adopt_identity(&self, id: u64, class_name: &str) {
        if let Ok(mut slot) = self.inner.id.lock() {
            *slot = Some(id);
        }
        self.set_class_name(class_name);
        self.inner.ctx.cache().set(id, self);
    }

    // ------------------------------------------------------------------
    // Property access
    // ------------------------------------------------------------------

    /// Read a property. Accessor members round-trip; method members return
    /// their function proxy; unknown names resolve to `Null` (after the
    /// one-time lazy fetch on member-function proxies).
    pub async fn get(&self, name: &str) -> Result<Value> {
        if let Some(slot) = self.find_slot(name) {
            return self.resolve_get(name, slot).await;
        }
        if self.ensure_members_loaded().await? {
            if let Some(slot) = self.find_slot(name) {
                return self.resolve_get(name, slot).await;
            }
        }
        Ok(Value::Null)
    }

    async fn resolve_get(&self, name: &str, slot: MemberSlot) -> Result<Value> {
        match slot {
            MemberSlot::Local { value, .. } => Ok(value),
            // The handed-out handle retains its receiver; the instance left
            // in the member table does not.
            MemberSlot::Method { func, .. } => {
                Ok(Value::Remote(func.with_receiver(&self.inner)))
            }
            MemberSlot::Accessor { .. } => {
                let id = self.require_id()?;
                self.inner
                    .ctx
                    .round_trip_value(requests::MEMBER_GET, vec![json!(id), json!(name)])
                    .await
            }
        }
    }

    /// Write a property.
    ///
    /// Writable accessors round-trip a member-set with the encoded value; a
    /// non-writable accessor is a silent no-op with no round trip. Method
    /// members are monkey-patched locally without touching the host, and
    /// unknown names become local expando slots.
    pub async fn set(&self, name: &str, value: Value) -> Result<()> {
        self.ensure_members_loaded().await?;
        match self.find_slot(name) {
            Some(MemberSlot::Accessor { writable: true, .. }) => {
                let id = self.require_id()?;
                let metas = self.inner.ctx.wrap_args(std::slice::from_ref(&value));
                let meta = serde_json::to_value(&metas[0])?;
                let result = self
                    .inner
                    .ctx
                    .channel()
                    .round_trip(requests::MEMBER_SET, vec![json!(id), json!(name), meta])
                    .await?;
                // Exceptions from host-side setters still propagate.
                self.inner.ctx.decode(&result)?;
                Ok(())
            }
            Some(MemberSlot::Accessor {
                writable: false, ..
            }) => Ok(()),
            _ => {
                self.put_local(name, value);
                Ok(())
            }
        }
    }

    /// Enumerable member names, own members first, then the prototype
    /// chain, deduplicated. Triggers the lazy fetch on member-function
    /// proxies.
    pub async fn member_names(&self) -> Result<Vec<String>> {
        self.ensure_members_loaded().await?;
        let mut names: Vec<String> = Vec::new();
        if let Ok(table) = self.inner.members.lock() {
            for (name, slot) in table.iter() {
                if slot.enumerable() {
                    names.push(name.clone());
                }
            }
        }
        if let Ok(proto) = self.inner.proto.lock() {
            let mut link = proto.as_ref();
            while let Some(current) = link {
                for (name, slot) in &current.members {
                    if slot.enumerable() && !names.contains(name) {
                        names.push(name.clone());
                    }
                }
                link = current.next.as_deref();
            }
        }
        Ok(names)
    }

    // ------------------------------------------------------------------
    // Invocation
    // ------------------------------------------------------------------

    /// Call a member as a method of this object.
    pub async fn call_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        let slot = match self.find_slot(name) {
            Some(slot) => Some(slot),
            // A miss may just mean the members are not loaded yet; resolve
            // again after the one-time fetch.
            None => {
                self.ensure_members_loaded().await?;
                self.find_slot(name)
            }
        };
        match slot {
            // Monkey-patched methods and fetched entry values run locally.
            Some(MemberSlot::Local { value, .. }) => {
                self.inner.ctx.invoke_value(&value, args.to_vec()).await
            }
            // Accessor-backed callables: fetch, then invoke.
            Some(MemberSlot::Accessor { .. }) => {
                let callee = self.get(name).await?;
                self.inner.ctx.invoke_value(&callee, args.to_vec()).await
            }
            Some(MemberSlot::Method { .. }) | None => {
                self.member_round_trip(requests::MEMBER_CALL, name, args).await
            }
        }
    }

    /// Invoke a member as a constructor; the result decodes as the
    /// constructed instance.
    pub async fn construct_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.ensure_members_loaded().await?;
        self.member_round_trip(requests::MEMBER_CONSTRUCTOR, name, args)
            .await
    }

    async fn member_round_trip(&self, request: &str, name: &str, args: &[Value]) -> Result<Value> {
        let id = self.require_id()?;
        let metas = self.inner.ctx.wrap_args(args);
        self.inner
            .ctx
            .round_trip_value(
                request,
                vec![json!(id), json!(name), serde_json::to_value(&metas)?],
            )
            .await
    }

    /// Invoke this proxy as a plain function call.
    pub async fn invoke(&self, args: &[Value]) -> Result<Value> {
        match &self.inner.kind {
            ProxyKind::Method { owner, name } => {
                let metas = self.inner.ctx.wrap_args(args);
                self.inner
                    .ctx
                    .round_trip_value(
                        requests::MEMBER_CALL,
                        vec![json!(owner), json!(name), serde_json::to_value(&metas)?],
                    )
                    .await
            }
            ProxyKind::Function => {
                let id = self.require_id()?;
                let metas = self.inner.ctx.wrap_args(args);
                self.inner
                    .ctx
                    .round_trip_value(
                        requests::TOP_LEVEL_CALL,
                        vec![json!(id), serde_json::to_value(&metas)?],
                    )
                    .await
            }
            ProxyKind::Object => Err(TetherError::NotCallable { kind: "object" }),
        }
    }

    /// Invoke this proxy as a constructor.
    pub async fn construct(&self, args: &[Value]) -> Result<Value> {
        match &self.inner.kind {
            ProxyKind::Method { owner, name } => {
                let metas = self.inner.ctx.wrap_args(args);
                self.inner
                    .ctx
                    .round_trip_value(
                        requests::MEMBER_CONSTRUCTOR,
                        vec![json!(owner), json!(name), serde_json::to_value(&metas)?],
                    )
                    .await
            }
            ProxyKind::Function => {
                let id = self.require_id()?;
                let metas = self.inner.ctx.wrap_args(args);
                self.inner
                    .ctx
                    .round_trip_value(
                        requests::TOP_LEVEL_CONSTRUCTOR,
                        vec![json!(id), serde_json::to_value(&metas)?],
                    )
                    .await
            }
            ProxyKind::Object => Err(TetherError::NotCallable { kind: "object" }),
        }
    }
}

// ----------------------------------------------------------------------
// Slot construction from wire descriptors
// ----------------------------------------------------------------------

fn build_slot(
    ctx: &RemoteContext,
    owner: Option<u64>,
    member: &MetaMember,
) -> Option<Result<(String, MemberSlot)>> {
    match member {
        MetaMember::Descriptor(descriptor) => {
            let Some(owner) = owner else {
                warn!(
                    "Dropping descriptor member {:?} on an object without a host id",
                    descriptor.name
                );
                return None;
            };
            let slot = match descriptor.kind {
                MemberKind::Method => MemberSlot::Method {
                    enumerable: descriptor.enumerable,
                    func: RemoteObject::new_method(ctx.clone(), owner, &descriptor.name),
                },
                MemberKind::Get => MemberSlot::Accessor {
                    enumerable: descriptor.enumerable,
                    writable: descriptor.writable,
                },
            };
            Some(Ok((descriptor.name.clone(), slot)))
        }
        MetaMember::Entry { name, value } => match ctx.decode(value) {
            Ok(value) => Some(Ok((
                name.clone(),
                MemberSlot::Local {
                    enumerable: true,
                    value,
                },
            ))),
            Err(e) => Some(Err(e)),
        },
    }
}

fn build_link(ctx: &RemoteContext, owner: Option<u64>, meta: &ProtoMeta) -> Result<ProtoLink> {
    let members = meta
        .members
        .iter()
        .filter_map(|member| build_slot(ctx, owner, member))
        .collect::<Result<Vec<_>>>()?;
    let next = match &meta.proto {
        Some(next) => Some(Box::new(build_link(ctx, owner, next)?)),
        None => None,
    };
    Ok(ProtoLink { members, next })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::events;
    use crate::context::RemoteContext;
    use crate::meta::ObjectMember;
    use crate::testing::MockChannel;
    use std::time::Duration;

    fn descriptor(name: &str, kind: MemberKind, writable: bool) -> MetaMember {
        MetaMember::Descriptor(ObjectMember {
            name: name.to_string(),
            kind,
            enumerable: true,
            writable,
        })
    }

    fn app_meta() -> Meta {
        Meta::Object {
            id: Some(1),
            name: "App".to_string(),
            members: vec![
                descriptor("quit", MemberKind::Method, false),
                descriptor("name", MemberKind::Get, true),
                descriptor("version", MemberKind::Get, false),
            ],
            proto: Some(Box::new(ProtoMeta {
                members: vec![descriptor("emit", MemberKind::Method, false)],
                proto: None,
            })),
        }
    }

    fn test_context(channel: std::sync::Arc<MockChannel>) -> RemoteContext {
        RemoteContext::new(channel)
    }

    async fn decoded_app(ctx: &RemoteContext) -> RemoteObject {
        let value = ctx.decode(&app_meta()).unwrap();
        match value {
            Value::Remote(proxy) => proxy,
            other => panic!("Expected proxy, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accessor_get_round_trips() {
        let channel = MockChannel::scripted(|request, args| {
            assert_eq!(request, requests::MEMBER_GET);
            assert_eq!(args[0], json!(1));
            assert_eq!(args[1], json!("name"));
            Ok(Meta::Value {
                value: json!("tether"),
            })
        });
        let ctx = test_context(channel.clone());
        let app = decoded_app(&ctx).await;

        let name = app.get("name").await.unwrap();
        assert_eq!(name.as_str(), Some("tether"));
        assert_eq!(channel.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_unknown_member_reads_null() {
        let channel = MockChannel::scripted(|_, _| Ok(Meta::null()));
        let ctx = test_context(channel.clone());
        let app = decoded_app(&ctx).await;

        assert!(app.get("nonexistent").await.unwrap().is_null());
        // No fetch for a fully loaded object proxy.
        assert_eq!(channel.round_trips(), 0);
    }

    #[tokio::test]
    async fn test_method_member_is_stable_function_proxy() {
        let channel = MockChannel::scripted(|_, _| Ok(Meta::null()));
        let ctx = test_context(channel);
        let app = decoded_app(&ctx).await;

        let a = app.get("quit").await.unwrap();
        let b = app.get("quit").await.unwrap();
        assert_eq!(a, b);
        assert!(a.as_remote().unwrap().is_function());
    }

    #[tokio::test]
    async fn test_set_writable_accessor_round_trips() {
        let channel = MockChannel::scripted(|request, args| {
            assert_eq!(request, requests::MEMBER_SET);
            assert_eq!(args[1], json!("name"));
            Ok(Meta::null())
        });
        let ctx = test_context(channel.clone());
        let app = decoded_app(&ctx).await;

        app.set("name", Value::from("renamed")).await.unwrap();
        assert_eq!(channel.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_set_readonly_accessor_is_silent_noop() {
        let channel = MockChannel::scripted(|_, _| Ok(Meta::null()));
        let ctx = test_context(channel.clone());
        let app = decoded_app(&ctx).await;

        app.set("version", Value::from("9.9.9")).await.unwrap();
        assert_eq!(channel.round_trips(), 0);
        // The remote-backed accessor still answers reads.
        assert!(matches!(
            app.get("version").await,
            Ok(Value::Null) | Ok(Value::Text(_))
        ));
    }

    #[tokio::test]
    async fn test_monkey_patched_method_runs_locally() {
        let channel = MockChannel::scripted(|_, _| Ok(Meta::null()));
        let ctx = test_context(channel.clone());
        let app = decoded_app(&ctx).await;

        app.set(
            "quit",
            Value::callback("proxy_test.rs:1", |_| Value::from("patched")),
        )
        .await
        .unwrap();

        let result = app.call_method("quit", &[]).await.unwrap();
        assert_eq!(result.as_str(), Some("patched"));
        assert_eq!(channel.round_trips(), 0);
    }

    #[tokio::test]
    async fn test_expando_write_stays_local() {
        let channel = MockChannel::scripted(|_, _| Ok(Meta::null()));
        let ctx = test_context(channel.clone());
        let app = decoded_app(&ctx).await;

        app.set("custom", Value::Number(42.0)).await.unwrap();
        assert_eq!(app.get("custom").await.unwrap(), Value::Number(42.0));
        assert_eq!(channel.round_trips(), 0);
    }

    #[tokio::test]
    async fn test_method_call_round_trips_with_encoded_args() {
        let channel = MockChannel::scripted(|request, args| {
            assert_eq!(request, requests::MEMBER_CALL);
            assert_eq!(args[0], json!(1));
            assert_eq!(args[1], json!("quit"));
            let metas: Vec<Meta> = serde_json::from_value(args[2].clone()).unwrap();
            assert_eq!(
                metas[0],
                Meta::Value {
                    value: json!("now")
                }
            );
            Ok(Meta::Value { value: json!(true) })
        });
        let ctx = test_context(channel);
        let app = decoded_app(&ctx).await;

        let result = app
            .call_method("quit", &[Value::from("now")])
            .await
            .unwrap();
        assert_eq!(result.as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_prototype_members_resolve_against_own_id() {
        let channel = MockChannel::scripted(|request, args| {
            assert_eq!(request, requests::MEMBER_CALL);
            assert_eq!(args[0], json!(1));
            assert_eq!(args[1], json!("emit"));
            Ok(Meta::null())
        });
        let ctx = test_context(channel);
        let app = decoded_app(&ctx).await;

        let emit = app.get("emit").await.unwrap();
        assert!(emit.as_remote().is_some());
        app.call_method("emit", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_member_function_fetches_own_members_once() {
        let channel = MockChannel::scripted(|request, args| {
            assert_eq!(request, requests::MEMBER_GET);
            assert_eq!(args[0], json!(1));
            assert_eq!(args[1], json!("quit"));
            Ok(Meta::Function {
                id: 50,
                location: None,
                name: "quit".to_string(),
                members: vec![MetaMember::Descriptor(ObjectMember {
                    name: "confirm".to_string(),
                    kind: MemberKind::Get,
                    enumerable: true,
                    writable: false,
                })],
                proto: None,
            })
        });
        let ctx = test_context(channel.clone());
        let app = decoded_app(&ctx).await;

        let quit = app.get("quit").await.unwrap();
        let quit = quit.as_remote().unwrap();
        assert_eq!(quit.remote_id(), None);

        // First miss triggers the single fetch and adopts the fetched id.
        assert!(quit.get("missing").await.unwrap().is_null());
        assert_eq!(quit.remote_id(), Some(50));
        assert_eq!(channel.round_trips_for(requests::MEMBER_GET), 1);

        // Further misses resolve locally.
        assert!(quit.get("also-missing").await.unwrap().is_null());
        assert_eq!(channel.round_trips_for(requests::MEMBER_GET), 1);

        // The fetched id is registered for identity.
        assert!(ctx.cache().has(50));
    }

    #[tokio::test]
    async fn test_member_function_invocation_targets_owner() {
        let channel = MockChannel::scripted(|request, args| {
            assert_eq!(request, requests::MEMBER_CALL);
            assert_eq!(args[0], json!(1));
            assert_eq!(args[1], json!("quit"));
            Ok(Meta::Value { value: json!("ok") })
        });
        let ctx = test_context(channel);
        let app = decoded_app(&ctx).await;

        let quit = app.get("quit").await.unwrap();
        let result = quit.as_remote().unwrap().invoke(&[]).await.unwrap();
        assert_eq!(result.as_str(), Some("ok"));
    }

    #[tokio::test]
    async fn test_member_function_handle_keeps_receiver_alive() {
        let channel = MockChannel::scripted(|_, _| Ok(Meta::null()));
        let ctx = test_context(channel.clone());
        let app = decoded_app(&ctx).await;

        let quit = app.get("quit").await.unwrap();
        drop(app);

        // The held member function retains its receiver: no release notice
        // for the owner while the function is still usable.
        assert!(channel
            .wait_for_one_way(events::OBJECT_RELEASED, Duration::from_millis(50))
            .await
            .is_none());
        assert!(ctx.cache().has(1));

        // Dropping the member function releases the receiver too.
        drop(quit);
        let released = channel
            .wait_for_one_way(events::OBJECT_RELEASED, Duration::from_secs(1))
            .await
            .expect("release notice");
        assert_eq!(released[0], json!(1));
    }

    #[tokio::test]
    async fn test_install_members_never_clobbers_existing_slots() {
        let channel = MockChannel::scripted(|_, _| Ok(Meta::null()));
        let ctx = test_context(channel.clone());
        let app = decoded_app(&ctx).await;

        app.set(
            "quit",
            Value::callback("proxy_test.rs:2", |_| Value::from("patched")),
        )
        .await
        .unwrap();

        // Re-installing a colliding descriptor must not replace the
        // monkey-patched slot; fresh names still install.
        app.install_members(&[
            descriptor("quit", MemberKind::Method, false),
            descriptor("restart", MemberKind::Method, false),
        ])
        .unwrap();

        let result = app.call_method("quit", &[]).await.unwrap();
        assert_eq!(result.as_str(), Some("patched"));
        assert_eq!(channel.round_trips(), 0);
        assert!(app.get("restart").await.unwrap().as_remote().is_some());
    }

    #[tokio::test]
    async fn test_lazily_fetched_entry_member_invokes_as_its_own_function() {
        let channel = MockChannel::scripted(|request, args| match request {
            requests::MEMBER_GET => Ok(Meta::Function {
                id: 50,
                location: None,
                name: "quit".to_string(),
                members: vec![MetaMember::Entry {
                    name: "helper".to_string(),
                    value: Meta::Function {
                        id: 70,
                        location: None,
                        name: "helper".to_string(),
                        members: Vec::new(),
                        proto: None,
                    },
                }],
                proto: None,
            }),
            requests::TOP_LEVEL_CALL => {
                // The fetched entry value is its own function, not a member
                // of the receiver.
                assert_eq!(args[0], json!(70));
                Ok(Meta::Value { value: json!("ok") })
            }
            other => panic!("Unexpected round trip: {}", other),
        });
        let ctx = test_context(channel);
        let app = decoded_app(&ctx).await;

        let quit = app.get("quit").await.unwrap();
        let result = quit
            .as_remote()
            .unwrap()
            .call_method("helper", &[])
            .await
            .unwrap();
        assert_eq!(result.as_str(), Some("ok"));
    }

    #[tokio::test]
    async fn test_member_names_includes_prototype_chain() {
        let channel = MockChannel::scripted(|_, _| Ok(Meta::null()));
        let ctx = test_context(channel);
        let app = decoded_app(&ctx).await;

        let names = app.member_names().await.unwrap();
        assert_eq!(names, vec!["quit", "name", "version", "emit"]);
    }

    #[tokio::test]
    async fn test_plain_object_proxy_is_not_callable() {
        let channel = MockChannel::scripted(|_, _| Ok(Meta::null()));
        let ctx = test_context(channel);
        let app = decoded_app(&ctx).await;

        let err = app.invoke(&[]).await.unwrap_err();
        assert!(matches!(err, TetherError::NotCallable { .. }));
    }
}
