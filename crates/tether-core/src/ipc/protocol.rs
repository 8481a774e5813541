//! Framed JSON-RPC 2.0 wire protocol.
//!
//! Every message is a 4-byte big-endian length prefix followed by a JSON
//! payload. Round trips are requests with an `id`; one-way sends and host
//! pushes are notifications (requests without an `id`). Response results
//! are metas, so the channel layer hands decodable descriptors upward
//! without reparsing.

use crate::config::ProtocolConfig;
use crate::error::{Result, TetherError};
use crate::meta::Meta;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request (or notification, when `id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl IpcRequest {
    pub fn new(method: &str, params: Vec<serde_json::Value>, id: u64) -> Self {
        Self {
            jsonrpc: ProtocolConfig::PROTOCOL_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(id),
        }
    }

    pub fn notification(method: &str, params: Vec<serde_json::Value>) -> Self {
        Self {
            jsonrpc: ProtocolConfig::PROTOCOL_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: None,
        }
    }
}

/// Response to a request carrying an `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
    pub id: u64,
}

impl IpcResponse {
    pub fn success(id: u64, result: Meta) -> Self {
        Self {
            jsonrpc: ProtocolConfig::PROTOCOL_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: ProtocolConfig::PROTOCOL_VERSION.to_string(),
            result: None,
            error: Some(IpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: i32,
    pub message: String,
}

/// Any inbound message. Variant order matters for untagged decoding:
/// `Request` is tried first since only it requires `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcFrame {
    Request(IpcRequest),
    Response(IpcResponse),
}

/// Read one length-prefixed frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > ProtocolConfig::MAX_MESSAGE_SIZE {
        return Err(TetherError::Protocol {
            message: format!(
                "frame of {} bytes exceeds limit of {} bytes",
                len,
                ProtocolConfig::MAX_MESSAGE_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > ProtocolConfig::MAX_MESSAGE_SIZE {
        return Err(TetherError::Protocol {
            message: format!(
                "frame of {} bytes exceeds limit of {} bytes",
                payload.len(),
                ProtocolConfig::MAX_MESSAGE_SIZE
            ),
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
