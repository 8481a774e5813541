//! Centralized configuration for the tether protocol.
//!
//! Constants governing IPC framing, connection setup, and internal queue
//! sizing live here so both the channel implementation and the tests agree
//! on limits.

use std::time::Duration;

/// Protocol-level configuration.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Maximum size of a single IPC frame payload (16 MB).
    ///
    /// Buffers cross the boundary inline, so this must comfortably exceed
    /// any binary payload the embedder sends.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

    /// JSON-RPC version stamped on every frame and validated by the host.
    pub const PROTOCOL_VERSION: &'static str = "2.0";
}

/// Channel connection configuration.
pub struct ChannelConfig;

impl ChannelConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum simultaneous client connections accepted by a host server.
    pub const MAX_CONNECTIONS: usize = 16;
}
