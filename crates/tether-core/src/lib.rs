//! Tether Core - Client side of a remote-object proxying protocol over IPC.
//!
//! This crate lets a client process hold and use objects that live in a
//! host process as if they were local: modules, globals, windows, and any
//! object reachable from them are mirrored by proxies whose property reads,
//! writes, and calls translate into round trips over one channel. Values
//! crossing the boundary travel as tagged "meta" descriptors; functions
//! passed to the host stay callable through a callbacks registry, and
//! proxy lifetimes are reported back so the host can release its side.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::{IpcChannel, RemoteContext, Value};
//!
//! #[tokio::main]
//! async fn main() -> tether_core::Result<()> {
//!     let channel = IpcChannel::connect("127.0.0.1:7878").await?;
//!     let ctx = RemoteContext::new(channel);
//!
//!     // Fetch a host module and call a method on it
//!     let app = ctx.require("app").await?;
//!     let app = app.as_remote().unwrap();
//!     let version = app.get("version").await?;
//!     println!("Host app version: {:?}", version);
//!
//!     app.call_method("quit", &[Value::from("now")]).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod callbacks;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod ipc;
pub mod meta;
pub mod proxy;
pub mod value;
pub mod view;

mod codec;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use cache::RemoteObjectCache;
pub use callbacks::CallbacksRegistry;
pub use channel::{events, requests, Channel, PushHandler};
pub use context::RemoteContext;
pub use error::{Result, TetherError};
pub use ipc::{IpcChannel, IpcError, IpcFrame, IpcRequest, IpcResponse};
pub use meta::{MemberKind, Meta, MetaMember, ObjectMember, PlainMember, ProtoMeta};
pub use proxy::RemoteObject;
pub use value::{Callback, Computed, ObjectValue, PromiseValue, Settlement, Value};
pub use view::{ViewMirror, WebViewBinding};
