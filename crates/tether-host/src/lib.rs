//! Tether Host - Host side of the tether remote-object protocol.
//!
//! A host process builds an object graph of [`HostObject`]s (modules,
//! builtins, windows, primary content objects), registers it on a
//! [`HostState`], and starts a [`HostServer`]. Connected clients then hold
//! proxies for those objects: every property read, write, call, and
//! constructor call arrives here as a round trip, and host-initiated work
//! (client callback invocations, view mirror updates, correlated fetch
//! results) flows back as pushes.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_host::{HostObject, HostServer, HostState, HostValue};
//!
//! #[tokio::main]
//! async fn main() -> tether_core::Result<()> {
//!     let state = Arc::new(HostState::new());
//!     let app = HostObject::builder("App")
//!         .data("version", HostValue::Text("1.0".into()))
//!         .method("quit", |_args| Ok(HostValue::Null))
//!         .build();
//!     state.register_module("app", app);
//!
//!     let handle = HostServer::start(state).await?;
//!     println!("Serving on {}", handle.addr());
//!     Ok(())
//! }
//! ```

pub mod objects;
pub mod serialize;
pub mod server;

pub use objects::{
    exception, ClientCallback, HostMethod, HostObject, HostObjectBuilder, HostProperty,
    HostPropertyKind, HostValue, ObjectsRegistry,
};
pub use serialize::{host_to_meta, meta_to_host};
pub use server::{HostServer, HostServerHandle, HostState, Notifier};
