//! TCP-backed [`Channel`] implementation.
//!
//! One connection carries everything: round trips are correlated by
//! request id to per-call oneshot slots, and inbound notifications are
//! dispatched to subscribed push handlers on a dedicated read task.

use crate::channel::{Channel, PushHandler};
use crate::config::ChannelConfig;
use crate::error::{Result, TetherError};
use crate::ipc::protocol::{read_frame, write_frame, IpcFrame, IpcRequest};
use crate::meta::Meta;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Meta>>>>>;
type Handlers = Arc<Mutex<HashMap<String, Vec<PushHandler>>>>;

/// A connected channel to the host process.
pub struct IpcChannel {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    next_id: AtomicU64,
    pending: Pending,
    handlers: Handlers,
    read_task: JoinHandle<()>,
}

impl IpcChannel {
    /// Connect to a host at `addr`, bounded by the configured timeout.
    pub async fn connect(addr: &str) -> Result<Arc<Self>> {
        let connect = TcpStream::connect(addr);
        let stream = tokio::time::timeout(ChannelConfig::CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| TetherError::Timeout(ChannelConfig::CONNECT_TIMEOUT))?
            .map_err(|e| TetherError::ConnectFailed {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;
        debug!("Connected to host at {}", addr);
        Ok(Self::over(stream))
    }

    /// Wrap an already-established stream.
    pub fn over(stream: TcpStream) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let handlers: Handlers = Arc::new(Mutex::new(HashMap::new()));
        let read_task = tokio::spawn(read_loop(read_half, pending.clone(), handlers.clone()));
        Arc::new(Self {
            writer: tokio::sync::Mutex::new(write_half),
            next_id: AtomicU64::new(1),
            pending,
            handlers,
            read_task,
        })
    }

    async fn send(&self, request: &IpcRequest) -> Result<()> {
        let payload = serde_json::to_vec(&IpcFrame::Request(request.clone()))?;
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &payload).await
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

#[async_trait]
impl Channel for IpcChannel {
    async fn round_trip(&self, request: &str, args: Vec<serde_json::Value>) -> Result<Meta> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }

        if let Err(e) = self.send(&IpcRequest::new(request, args, id)).await {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&id);
            }
            return Err(e);
        }

        rx.await.map_err(|_| TetherError::ChannelClosed)?
    }

    async fn one_way(&self, event: &str, args: Vec<serde_json::Value>) -> Result<()> {
        self.send(&IpcRequest::notification(event, args)).await
    }

    fn subscribe(&self, event: &str, handler: PushHandler) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.entry(event.to_string()).or_default().push(handler);
        }
    }

    fn unsubscribe(&self, event: &str) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.remove(event);
        }
    }
}

async fn read_loop(mut reader: OwnedReadHalf, pending: Pending, handlers: Handlers) {
    loop {
        let payload = match read_frame(&mut reader).await {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Channel read loop ending: {}", e);
                break;
            }
        };

        match serde_json::from_slice::<IpcFrame>(&payload) {
            Ok(IpcFrame::Response(response)) => {
                let slot = match pending.lock() {
                    Ok(mut pending) => pending.remove(&response.id),
                    Err(_) => None,
                };
                let Some(slot) = slot else {
                    warn!("Response for unknown request id {}", response.id);
                    continue;
                };
                let outcome = match (response.result, response.error) {
                    (_, Some(error)) => Err(TetherError::HostError {
                        code: error.code,
                        message: error.message,
                    }),
                    (Some(result), None) => Ok(result),
                    (None, None) => Ok(Meta::null()),
                };
                let _ = slot.send(outcome);
            }
            Ok(IpcFrame::Request(request)) if request.id.is_none() => {
                let matched: Vec<PushHandler> = match handlers.lock() {
                    Ok(handlers) => handlers
                        .get(&request.method)
                        .cloned()
                        .unwrap_or_default(),
                    Err(_) => Vec::new(),
                };
                if matched.is_empty() {
                    debug!("No handler subscribed for push {:?}", request.method);
                }
                for handler in matched {
                    handler(request.params.clone());
                }
            }
            Ok(IpcFrame::Request(request)) => {
                warn!(
                    "Ignoring host-initiated round trip {:?} (id {:?})",
                    request.method, request.id
                );
            }
            Err(e) => {
                warn!("Discarding undecodable frame: {}", e);
            }
        }
    }

    // The connection is gone; fail every in-flight round trip.
    if let Ok(mut pending) = pending.lock() {
        for (_, slot) in pending.drain() {
            let _ = slot.send(Err(TetherError::ChannelClosed));
        }
    }
}
