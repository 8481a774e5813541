//! The per-connection protocol state and its public entry points.
//!
//! A [`RemoteContext`] owns everything the protocol needs on this side of
//! the boundary: the channel, the callbacks registry, the remote object
//! cache, and the release queue. All of it lives in one shared container
//! handed to proxies at construction, so two contexts on two channels never
//! share state.

use crate::cache::RemoteObjectCache;
use crate::callbacks::CallbacksRegistry;
use crate::channel::{events, requests, Channel};
use crate::codec;
use crate::error::{Result, TetherError};
use crate::meta::Meta;
use crate::value::Value;
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub(crate) struct ContextInner {
    channel: Arc<dyn Channel>,
    callbacks: CallbacksRegistry,
    cache: RemoteObjectCache,
    release_tx: mpsc::UnboundedSender<u64>,
}

/// Handle to one side of a remote-object session. Cheap to clone; all
/// clones share the same registries.
#[derive(Clone)]
pub struct RemoteContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for RemoteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteContext")
            .field("callbacks", &self.inner.callbacks.len())
            .field("cached_objects", &self.inner.cache.live_count())
            .finish()
    }
}

impl RemoteContext {
    /// Build a context over `channel` and wire up the push subscriptions
    /// and the release forwarder. Must be called within a tokio runtime.
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        let (release_tx, mut release_rx) = mpsc::unbounded_channel::<u64>();
        let inner = Arc::new(ContextInner {
            channel: channel.clone(),
            callbacks: CallbacksRegistry::new(),
            cache: RemoteObjectCache::new(),
            release_tx,
        });

        // Forward queued release notices as one-way sends. Failures are
        // logged and dropped; a release has no caller to report to.
        let forward = channel.clone();
        tokio::spawn(async move {
            while let Some(id) = release_rx.recv().await {
                if let Err(e) = forward.one_way(events::OBJECT_RELEASED, vec![json!(id)]).await {
                    debug!("Release notice for object {} dropped: {}", id, e);
                }
            }
        });

        // Push handlers hold the context weakly so subscriptions never keep
        // a dropped context alive through the channel.
        let weak = Arc::downgrade(&inner);
        channel.subscribe(
            events::CALLBACK_INVOKE,
            Arc::new(move |args| {
                let Some(ctx) = RemoteContext::upgrade(&weak) else {
                    return;
                };
                ctx.dispatch_callback_invoke(&args);
            }),
        );

        let weak = Arc::downgrade(&inner);
        channel.subscribe(
            events::CALLBACK_RELEASE,
            Arc::new(move |args| {
                let Some(ctx) = RemoteContext::upgrade(&weak) else {
                    return;
                };
                match args.first().and_then(|v| v.as_u64()) {
                    Some(id) => ctx.inner.callbacks.remove(id),
                    None => warn!("Malformed callback-release push: {:?}", args),
                }
            }),
        );

        Self { inner }
    }

    fn upgrade(weak: &Weak<ContextInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn dispatch_callback_invoke(&self, args: &[serde_json::Value]) {
        let Some(id) = args.first().and_then(|v| v.as_u64()) else {
            warn!("Malformed callback-invoke push: {:?}", args);
            return;
        };
        let metas: Vec<Meta> = match args.get(1) {
            Some(raw) => match serde_json::from_value(raw.clone()) {
                Ok(metas) => metas,
                Err(e) => {
                    warn!("Undecodable callback-invoke arguments for id {}: {}", id, e);
                    return;
                }
            },
            None => Vec::new(),
        };
        let mut decoded = Vec::with_capacity(metas.len());
        for meta in &metas {
            match self.decode(meta) {
                Ok(value) => decoded.push(value),
                Err(e) => {
                    warn!("Dropping callback invocation for id {}: {}", id, e);
                    return;
                }
            }
        }
        self.inner.callbacks.apply(id, decoded);
    }

    pub(crate) fn channel(&self) -> &Arc<dyn Channel> {
        &self.inner.channel
    }

    pub(crate) fn callbacks(&self) -> &CallbacksRegistry {
        &self.inner.callbacks
    }

    pub(crate) fn cache(&self) -> &RemoteObjectCache {
        &self.inner.cache
    }

    /// Queue a release notice for a host object id. Callable from drop
    /// paths; the send is non-blocking.
    pub(crate) fn queue_release(&self, id: u64) {
        if self.inner.release_tx.send(id).is_err() {
            debug!("Release queue closed; dropping notice for object {}", id);
        }
    }

    /// Encode an argument list for transmission.
    pub fn wrap_args(&self, args: &[Value]) -> Vec<Meta> {
        codec::wrap_args(self, args)
    }

    /// Decode a received meta. An `exception` meta surfaces as
    /// [`TetherError::RemoteException`].
    pub fn decode(&self, meta: &Meta) -> Result<Value> {
        codec::meta_to_value(self, meta)
    }

    /// Round trip plus decode of the response meta.
    pub(crate) async fn round_trip_value(
        &self,
        request: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<Value> {
        let meta = self.inner.channel.round_trip(request, args).await?;
        self.decode(&meta)
    }

    /// Invoke any callable value with the given arguments.
    pub async fn invoke_value(&self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Callback(callback) => Ok(callback.invoke(args)),
            Value::Computed(computed) => Ok(computed.evaluate()),
            Value::Remote(proxy) => proxy.invoke(&args).await,
            other => Err(TetherError::NotCallable { kind: other.kind() }),
        }
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Fetch a host module by name.
    pub async fn require(&self, module: &str) -> Result<Value> {
        self.round_trip_value(requests::REQUIRE_MODULE, vec![json!(module)])
            .await
    }

    /// Fetch a host global by name.
    pub async fn get_builtin(&self, name: &str) -> Result<Value> {
        self.round_trip_value(requests::GET_BUILTIN, vec![json!(name)])
            .await
    }

    /// The window object owning this client.
    pub async fn get_current_window(&self) -> Result<Value> {
        self.round_trip_value(requests::GET_CURRENT_WINDOW, vec![])
            .await
    }

    /// The primary content object owning this client.
    pub async fn get_current_primary(&self) -> Result<Value> {
        self.round_trip_value(requests::GET_CURRENT_PRIMARY, vec![])
            .await
    }

    /// Fetch a primary content object by numeric handle. The host replies
    /// asynchronously on a one-off push correlated by a fresh guid.
    pub async fn fetch_primary_object(&self, handle: i64) -> Result<Value> {
        let guid = self.inner.channel.guid();
        let event = events::fetch_result(&guid);

        let (tx, rx) = oneshot::channel::<Meta>();
        let slot = Arc::new(std::sync::Mutex::new(Some(tx)));
        self.inner.channel.subscribe(
            &event,
            Arc::new(move |args| {
                let Some(tx) = slot.lock().ok().and_then(|mut slot| slot.take()) else {
                    return;
                };
                let meta = match args.first() {
                    Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
                        warn!("Undecodable fetch result: {}", e);
                        Meta::null()
                    }),
                    None => Meta::null(),
                };
                let _ = tx.send(meta);
            }),
        );

        let sent = self
            .inner
            .channel
            .one_way(events::FETCH_PRIMARY_OBJECT, vec![json!(handle), json!(guid)])
            .await;
        if let Err(e) = sent {
            self.inner.channel.unsubscribe(&event);
            return Err(e);
        }

        let meta = rx.await.map_err(|_| TetherError::ChannelClosed);
        self.inner.channel.unsubscribe(&event);
        self.decode(&meta?)
    }

    /// Fire-and-forget method invocation on the primary object identified
    /// by `handle`. No result, no error reporting from the host.
    pub async fn call_async_member(
        &self,
        handle: i64,
        method: &str,
        args: &[Value],
    ) -> Result<()> {
        let metas = self.wrap_args(args);
        self.inner
            .channel
            .one_way(
                events::ASYNC_MEMBER_CALL,
                vec![json!(handle), json!(method), serde_json::to_value(&metas)?],
            )
            .await
    }
}
