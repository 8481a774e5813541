//! TCP transport: framed JSON-RPC protocol plus the concrete channel.

pub mod client;
pub mod protocol;

pub use client::IpcChannel;
pub use protocol::{IpcError, IpcFrame, IpcRequest, IpcResponse};
