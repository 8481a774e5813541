//! The call/response and push-subscription surface toward the host process.
//!
//! The protocol core is transport-agnostic: anything that can carry a named
//! round trip, a named one-way send, and asynchronous pushes can back a
//! [`crate::context::RemoteContext`]. The concrete TCP implementation lives
//! in [`crate::ipc`].

use crate::error::Result;
use crate::meta::Meta;
use async_trait::async_trait;
use std::sync::Arc;

/// Round-trip request names issued by the protocol core.
pub mod requests {
    pub const REQUIRE_MODULE: &str = "require-module";
    pub const GET_BUILTIN: &str = "get-builtin";
    pub const GET_CURRENT_WINDOW: &str = "get-current-window-object";
    pub const GET_CURRENT_PRIMARY: &str = "get-current-primary-object";
    pub const MEMBER_GET: &str = "member-get";
    pub const MEMBER_SET: &str = "member-set";
    pub const MEMBER_CALL: &str = "member-call";
    pub const MEMBER_CONSTRUCTOR: &str = "member-constructor";
    pub const TOP_LEVEL_CALL: &str = "top-level-call";
    pub const TOP_LEVEL_CONSTRUCTOR: &str = "top-level-constructor";
}

/// One-way and push event names.
pub mod events {
    /// Fire-and-forget method invocation on the current primary object.
    pub const ASYNC_MEMBER_CALL: &str = "async-member-call";
    /// Lifetime notice: a local proxy became unreachable.
    pub const OBJECT_RELEASED: &str = "object-released";
    /// One-way request for a primary object; the reply arrives as a
    /// correlated `fetch-result-<guid>` push.
    pub const FETCH_PRIMARY_OBJECT: &str = "fetch-primary-object";
    /// Host invokes a registered client callback: `(id, [arg metas])`.
    pub const CALLBACK_INVOKE: &str = "callback-invoke";
    /// Host discarded its reference to a registered callback: `(id)`.
    pub const CALLBACK_RELEASE: &str = "callback-release";
    /// Host pushed a fresh snapshot of the view mirror.
    pub const MIRROR_UPDATE: &str = "mirror-update";

    /// Correlated push name for a one-off fetch keyed by `guid`.
    pub fn fetch_result(guid: &str) -> String {
        format!("fetch-result-{}", guid)
    }
}

/// Handler for an asynchronous push from the host.
pub type PushHandler = Arc<dyn Fn(Vec<serde_json::Value>) + Send + Sync>;

/// Thin exchange surface used by the protocol core.
///
/// Ordering: round trips on one channel are strictly request-then-response;
/// pushes are delivered in send order but are not ordered relative to round
/// trips beyond channel FIFO. There is no timeout at this layer; a round
/// trip blocks its task until the host responds.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Blocking request/response exchange; the response is a decodable meta.
    async fn round_trip(&self, request: &str, args: Vec<serde_json::Value>) -> Result<Meta>;

    /// Fire-and-forget send.
    async fn one_way(&self, event: &str, args: Vec<serde_json::Value>) -> Result<()>;

    /// Subscribe to an asynchronous push from the host. Multiple handlers
    /// per event are allowed; all run on the dispatch task.
    fn subscribe(&self, event: &str, handler: PushHandler);

    /// Drop all handlers for `event`.
    fn unsubscribe(&self, event: &str);

    /// Process-unique correlation id for one-off response pushes.
    fn guid(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
