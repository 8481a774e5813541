//! TCP server exposing the host object graph to clients.
//!
//! Listens on `127.0.0.1:0`, accepts client connections, and serves every
//! round-trip request against a shared [`HostState`]. Each connection gets
//! its own task plus an outbound writer task, so host-initiated pushes
//! (callback invocations, mirror updates, correlated fetch results) share
//! the wire with request responses without interleaving frames.

use crate::objects::{
    exception, HostObject, HostPropertyKind, HostValue, ObjectsRegistry,
};
use crate::serialize::{host_to_meta, meta_to_host};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tether_core::config::ChannelConfig;
use tether_core::events;
use tether_core::ipc::protocol::{read_frame, write_frame};
use tether_core::view::ViewMirror;
use tether_core::{IpcFrame, IpcRequest, IpcResponse, Meta, Result, TetherError};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Outbound notification path for one connection. Clonable; sends are
/// dropped silently once the connection is gone.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<IpcFrame>,
}

impl Notifier {
    fn new(tx: mpsc::UnboundedSender<IpcFrame>) -> Self {
        Self { tx }
    }

    /// A notifier with no connection behind it; every send is dropped.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Push a notification to the client.
    pub fn notify(&self, method: &str, params: Vec<serde_json::Value>) {
        let frame = IpcFrame::Request(IpcRequest::notification(method, params));
        if self.tx.send(frame).is_err() {
            debug!("Dropping {} push: connection closed", method);
        }
    }

    fn respond(&self, response: IpcResponse) {
        if self.tx.send(IpcFrame::Response(response)).is_err() {
            debug!("Dropping response: connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Everything a host process serves: modules, builtins, window and primary
/// objects, plus the registry of objects already handed out.
pub struct HostState {
    registry: Arc<ObjectsRegistry>,
    modules: Mutex<HashMap<String, Arc<HostObject>>>,
    builtins: Mutex<HashMap<String, HostValue>>,
    current_window: Mutex<Option<Arc<HostObject>>>,
    current_primary: Mutex<Option<Arc<HostObject>>>,
    primaries: Mutex<HashMap<i64, Arc<HostObject>>>,
    /// Function objects minted for `member-get` on a method, keyed by
    /// owner id and member name so repeated fetches stay identity-stable.
    bound_methods: Mutex<HashMap<(u64, String), Arc<HostObject>>>,
    connections: Mutex<Vec<Notifier>>,
}

impl Default for HostState {
    fn default() -> Self {
        Self::new()
    }
}

impl HostState {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ObjectsRegistry::new()),
            modules: Mutex::new(HashMap::new()),
            builtins: Mutex::new(HashMap::new()),
            current_window: Mutex::new(None),
            current_primary: Mutex::new(None),
            primaries: Mutex::new(HashMap::new()),
            bound_methods: Mutex::new(HashMap::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ObjectsRegistry> {
        &self.registry
    }

    pub fn register_module(&self, name: impl Into<String>, module: Arc<HostObject>) {
        if let Ok(mut modules) = self.modules.lock() {
            modules.insert(name.into(), module);
        }
    }

    pub fn register_builtin(&self, name: impl Into<String>, value: HostValue) {
        if let Ok(mut builtins) = self.builtins.lock() {
            builtins.insert(name.into(), value);
        }
    }

    pub fn set_current_window(&self, window: Arc<HostObject>) {
        if let Ok(mut current) = self.current_window.lock() {
            *current = Some(window);
        }
    }

    pub fn set_current_primary(&self, primary: Arc<HostObject>) {
        if let Ok(mut current) = self.current_primary.lock() {
            *current = Some(primary);
        }
    }

    /// Register a primary content object addressable by numeric handle
    /// (for `fetch-primary-object` and `async-member-call`).
    pub fn register_primary(&self, handle: i64, primary: Arc<HostObject>) {
        if let Ok(mut primaries) = self.primaries.lock() {
            primaries.insert(handle, primary);
        }
    }

    /// Push a fresh view snapshot to every connected client.
    pub fn broadcast_mirror_update(&self, handle: i64, mirror: &ViewMirror) {
        let snapshot = match serde_json::to_value(mirror) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Unserializable mirror snapshot: {}", e);
                return;
            }
        };
        if let Ok(mut connections) = self.connections.lock() {
            connections.retain(|notifier| !notifier.is_closed());
            for notifier in connections.iter() {
                notifier.notify(
                    events::MIRROR_UPDATE,
                    vec![serde_json::json!(handle), snapshot.clone()],
                );
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        match self.connections.lock() {
            Ok(mut connections) => {
                connections.retain(|notifier| !notifier.is_closed());
                connections.len()
            }
            Err(_) => 0,
        }
    }

    fn track_connection(&self, notifier: Notifier) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.push(notifier);
        }
    }

    // ------------------------------------------------------------------
    // Round-trip dispatch
    // ------------------------------------------------------------------

    fn dispatch(
        &self,
        notifier: &Notifier,
        method: &str,
        params: &[serde_json::Value],
    ) -> Result<Meta> {
        match method {
            tether_core::requests::REQUIRE_MODULE => {
                let name = param_str(params, 0)?;
                let module = self
                    .modules
                    .lock()
                    .ok()
                    .and_then(|modules| modules.get(name).cloned())
                    .ok_or_else(|| exception(format!("no such module: {}", name)))?;
                Ok(host_to_meta(&self.registry, &HostValue::Object(module)))
            }
            tether_core::requests::GET_BUILTIN => {
                let name = param_str(params, 0)?;
                let builtin = self
                    .builtins
                    .lock()
                    .ok()
                    .and_then(|builtins| builtins.get(name).cloned())
                    .ok_or_else(|| exception(format!("no such builtin: {}", name)))?;
                Ok(host_to_meta(&self.registry, &builtin))
            }
            tether_core::requests::GET_CURRENT_WINDOW => {
                let window = self
                    .current_window
                    .lock()
                    .ok()
                    .and_then(|current| current.clone())
                    .ok_or_else(|| exception("no current window"))?;
                Ok(host_to_meta(&self.registry, &HostValue::Object(window)))
            }
            tether_core::requests::GET_CURRENT_PRIMARY => {
                let primary = self
                    .current_primary
                    .lock()
                    .ok()
                    .and_then(|current| current.clone())
                    .ok_or_else(|| exception("no current primary object"))?;
                Ok(host_to_meta(&self.registry, &HostValue::Object(primary)))
            }
            tether_core::requests::MEMBER_GET => {
                let object = self.object(param_u64(params, 0)?)?;
                let name = param_str(params, 1)?;
                self.member_get(param_u64(params, 0)?, &object, name)
            }
            tether_core::requests::MEMBER_SET => {
                let object = self.object(param_u64(params, 0)?)?;
                let name = param_str(params, 1)?;
                let value = meta_to_host(&self.registry, notifier, &param_meta(params, 2)?)?;
                self.member_set(&object, name, value)
            }
            tether_core::requests::MEMBER_CALL => {
                let object = self.object(param_u64(params, 0)?)?;
                let name = param_str(params, 1)?;
                let args = self.decode_args(notifier, params, 2)?;
                self.member_call(&object, name, args)
            }
            tether_core::requests::MEMBER_CONSTRUCTOR => {
                // Construction runs the same body; the method decides what
                // instance to return.
                let object = self.object(param_u64(params, 0)?)?;
                let name = param_str(params, 1)?;
                let args = self.decode_args(notifier, params, 2)?;
                self.member_call(&object, name, args)
            }
            tether_core::requests::TOP_LEVEL_CALL
            | tether_core::requests::TOP_LEVEL_CONSTRUCTOR => {
                let object = self.object(param_u64(params, 0)?)?;
                let args = self.decode_args(notifier, params, 1)?;
                let callable = object
                    .callable()
                    .ok_or_else(|| exception(format!("{} is not callable", object.class_name())))?;
                let result = callable(args)?;
                Ok(host_to_meta(&self.registry, &result))
            }
            unknown => Err(TetherError::Validation {
                field: "method".to_string(),
                message: format!("unknown request: {}", unknown),
            }),
        }
    }

    fn object(&self, id: u64) -> Result<Arc<HostObject>> {
        self.registry.get(id).ok_or_else(|| TetherError::Protocol {
            message: format!("unknown object id: {}", id),
        })
    }

    fn member_get(&self, id: u64, object: &Arc<HostObject>, name: &str) -> Result<Meta> {
        let Some(property) = object.find_property(name) else {
            return Ok(Meta::null());
        };
        match &property.kind {
            HostPropertyKind::Data { value, .. } => {
                let value = value
                    .lock()
                    .map_err(|_| exception(format!("property {} is poisoned", name)))?
                    .clone();
                Ok(host_to_meta(&self.registry, &value))
            }
            HostPropertyKind::Method(body) => {
                let bound = {
                    let mut cache = self.bound_methods.lock().map_err(|_| {
                        exception(format!("method cache unavailable for {}", name))
                    })?;
                    cache
                        .entry((id, name.to_string()))
                        .or_insert_with(|| {
                            let body = body.clone();
                            HostObject::builder(name).callable(move |args| body(args)).build()
                        })
                        .clone()
                };
                Ok(host_to_meta(&self.registry, &HostValue::Object(bound)))
            }
        }
    }

    fn member_set(&self, object: &Arc<HostObject>, name: &str, value: HostValue) -> Result<Meta> {
        match object.find_property(name).map(|p| &p.kind) {
            Some(HostPropertyKind::Data {
                value: slot,
                writable: true,
            }) => {
                let mut slot = slot
                    .lock()
                    .map_err(|_| exception(format!("property {} is poisoned", name)))?;
                *slot = value;
                Ok(Meta::null())
            }
            Some(HostPropertyKind::Data { writable: false, .. }) => Err(exception(format!(
                "cannot assign to read-only property {}",
                name
            ))),
            _ => Err(exception(format!("cannot set property {}", name))),
        }
    }

    fn member_call(
        &self,
        object: &Arc<HostObject>,
        name: &str,
        args: Vec<HostValue>,
    ) -> Result<Meta> {
        let body = match object.find_property(name).map(|p| &p.kind) {
            Some(HostPropertyKind::Method(body)) => body.clone(),
            Some(HostPropertyKind::Data { value, .. }) => {
                // A data property can hold a callable object.
                let held = value
                    .lock()
                    .map_err(|_| exception(format!("property {} is poisoned", name)))?
                    .clone();
                match held {
                    HostValue::Object(callee) => callee
                        .callable()
                        .cloned()
                        .ok_or_else(|| exception(format!("{} is not a function", name)))?,
                    _ => return Err(exception(format!("{} is not a function", name))),
                }
            }
            None => return Err(exception(format!("no such method: {}", name))),
        };
        let result = body(args)?;
        Ok(host_to_meta(&self.registry, &result))
    }

    fn decode_args(
        &self,
        notifier: &Notifier,
        params: &[serde_json::Value],
        index: usize,
    ) -> Result<Vec<HostValue>> {
        let metas = param_metas(params, index)?;
        metas
            .iter()
            .map(|meta| meta_to_host(&self.registry, notifier, meta))
            .collect()
    }

    // ------------------------------------------------------------------
    // One-way handling
    // ------------------------------------------------------------------

    fn handle_notification(
        &self,
        notifier: &Notifier,
        method: &str,
        params: &[serde_json::Value],
    ) {
        match method {
            events::OBJECT_RELEASED => {
                let Ok(id) = param_u64(params, 0) else {
                    warn!("Malformed object-released notice: {:?}", params);
                    return;
                };
                self.registry.remove(id);
                if let Ok(mut cache) = self.bound_methods.lock() {
                    cache.retain(|(owner, _), _| *owner != id);
                }
            }
            events::ASYNC_MEMBER_CALL => {
                let (Ok(handle), Ok(name)) = (param_i64(params, 0), param_str(params, 1)) else {
                    warn!("Malformed async-member-call: {:?}", params);
                    return;
                };
                let Some(primary) = self
                    .primaries
                    .lock()
                    .ok()
                    .and_then(|primaries| primaries.get(&handle).cloned())
                else {
                    warn!("async-member-call for unknown primary {}", handle);
                    return;
                };
                let args = match self.decode_args(notifier, params, 2) {
                    Ok(args) => args,
                    Err(e) => {
                        warn!("Undecodable async-member-call arguments: {}", e);
                        return;
                    }
                };
                // Fire-and-forget: failures are logged, never reported.
                if let Err(e) = self.member_call(&primary, name, args) {
                    warn!("async {} on primary {} failed: {}", name, handle, e);
                }
            }
            events::FETCH_PRIMARY_OBJECT => {
                let (Ok(handle), Ok(guid)) = (param_i64(params, 0), param_str(params, 1)) else {
                    warn!("Malformed fetch-primary-object: {:?}", params);
                    return;
                };
                let meta = match self
                    .primaries
                    .lock()
                    .ok()
                    .and_then(|primaries| primaries.get(&handle).cloned())
                {
                    Some(primary) => host_to_meta(&self.registry, &HostValue::Object(primary)),
                    None => Meta::null(),
                };
                match serde_json::to_value(&meta) {
                    Ok(payload) => {
                        notifier.notify(&events::fetch_result(guid), vec![payload]);
                    }
                    Err(e) => warn!("Unserializable fetch result: {}", e),
                }
            }
            other => {
                debug!("Ignoring notification {:?}", other);
            }
        }
    }
}

// ----------------------------------------------------------------------
// Parameter extraction
// ----------------------------------------------------------------------

fn param<'a>(params: &'a [serde_json::Value], index: usize) -> Result<&'a serde_json::Value> {
    params.get(index).ok_or_else(|| TetherError::Validation {
        field: format!("params[{}]", index),
        message: "missing parameter".to_string(),
    })
}

fn param_u64(params: &[serde_json::Value], index: usize) -> Result<u64> {
    param(params, index)?
        .as_u64()
        .ok_or_else(|| TetherError::Validation {
            field: format!("params[{}]", index),
            message: "expected an unsigned integer".to_string(),
        })
}

fn param_i64(params: &[serde_json::Value], index: usize) -> Result<i64> {
    param(params, index)?
        .as_i64()
        .ok_or_else(|| TetherError::Validation {
            field: format!("params[{}]", index),
            message: "expected an integer".to_string(),
        })
}

fn param_str<'a>(params: &'a [serde_json::Value], index: usize) -> Result<&'a str> {
    param(params, index)?
        .as_str()
        .ok_or_else(|| TetherError::Validation {
            field: format!("params[{}]", index),
            message: "expected a string".to_string(),
        })
}

fn param_meta(params: &[serde_json::Value], index: usize) -> Result<Meta> {
    serde_json::from_value(param(params, index)?.clone()).map_err(|e| TetherError::Validation {
        field: format!("params[{}]", index),
        message: format!("expected a meta: {}", e),
    })
}

fn param_metas(params: &[serde_json::Value], index: usize) -> Result<Vec<Meta>> {
    serde_json::from_value(param(params, index)?.clone()).map_err(|e| TetherError::Validation {
        field: format!("params[{}]", index),
        message: format!("expected an argument meta list: {}", e),
    })
}

// ----------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------

/// Handle to a running host server. Dropping shuts it down.
pub struct HostServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl HostServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and signal active handlers to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for HostServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

pub struct HostServer;

impl HostServer {
    /// Start serving `state` on an OS-assigned local port.
    pub async fn start(state: Arc<HostState>) -> Result<HostServerHandle> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("Host server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            state,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(HostServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        state: Arc<HostState>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Host server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= ChannelConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    ChannelConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let state = state.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Client connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, &state, &mut conn_shutdown).await {
                                    debug!("Connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        state: &Arc<HostState>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<IpcFrame>();
        let notifier = Notifier::new(tx);
        state.track_connection(notifier.clone());

        let writer_task = tokio::spawn(write_loop(writer, rx));

        let outcome = loop {
            let payload = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result {
                        Ok(payload) => payload,
                        Err(e) => break Err(e),
                    }
                }
                _ = shutdown_rx.changed() => break Ok(()),
            };

            let frame = match serde_json::from_slice::<IpcFrame>(&payload) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("Discarding undecodable frame: {}", e);
                    continue;
                }
            };

            match frame {
                IpcFrame::Request(request) if request.id.is_some() => {
                    let id = request.id.unwrap_or_default();
                    if request.jsonrpc != tether_core::config::ProtocolConfig::PROTOCOL_VERSION {
                        notifier.respond(IpcResponse::failure(
                            id,
                            -32600,
                            "Invalid Request: expected jsonrpc 2.0",
                        ));
                        continue;
                    }
                    let response =
                        match state.dispatch(&notifier, &request.method, &request.params) {
                            Ok(meta) => IpcResponse::success(id, meta),
                            // Host failures travel as exception metas, not
                            // protocol errors.
                            Err(TetherError::RemoteException { message, stack }) => {
                                IpcResponse::success(id, Meta::Exception { message, stack })
                            }
                            Err(e) => IpcResponse::failure(id, e.to_rpc_error_code(), e.to_string()),
                        };
                    notifier.respond(response);
                }
                IpcFrame::Request(request) => {
                    state.handle_notification(&notifier, &request.method, &request.params);
                }
                IpcFrame::Response(response) => {
                    warn!("Ignoring client-sent response for id {}", response.id);
                }
            }
        };

        writer_task.abort();
        match outcome {
            // EOF is a clean disconnect.
            Err(TetherError::Io {
                source: Some(source),
                ..
            }) if source.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                Ok(())
            }
            other => other,
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<IpcFrame>) {
    while let Some(frame) = rx.recv().await {
        let payload = match serde_json::to_vec(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unserializable outbound frame: {}", e);
                continue;
            }
        };
        if let Err(e) = write_frame(&mut writer, &payload).await {
            debug!("Write loop ending: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app_state() -> Arc<HostState> {
        let state = HostState::new();
        let app = HostObject::builder("App")
            .method("add", |args| {
                let a = args.first().and_then(HostValue::as_f64).unwrap_or(0.0);
                let b = args.get(1).and_then(HostValue::as_f64).unwrap_or(0.0);
                Ok(HostValue::Number(a + b))
            })
            .data("version", HostValue::Text("1.0".to_string()))
            .build();
        state.register_module("app", app);
        Arc::new(state)
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut handle = HostServer::start(app_state()).await.unwrap();
        assert!(handle.port > 0);
        assert_eq!(handle.addr.ip(), std::net::Ipv4Addr::LOCALHOST);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_require_and_member_call_over_socket() {
        let state = app_state();
        let mut handle = HostServer::start(state).await.unwrap();

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let request = IpcRequest::new("require-module", vec![json!("app")], 1);
        let bytes = serde_json::to_vec(&IpcFrame::Request(request)).unwrap();
        write_frame(&mut stream, &bytes).await.unwrap();

        let payload = read_frame(&mut stream).await.unwrap();
        let IpcFrame::Response(response) = serde_json::from_slice(&payload).unwrap() else {
            panic!("Expected response frame");
        };
        let Some(Meta::Object { id: Some(id), name, .. }) = response.result else {
            panic!("Expected object meta, got: {:?}", response.result);
        };
        assert_eq!(name, "App");

        let args = serde_json::to_value(vec![
            Meta::Value { value: json!(2.0) },
            Meta::Value { value: json!(3.0) },
        ])
        .unwrap();
        let request = IpcRequest::new("member-call", vec![json!(id), json!("add"), args], 2);
        let bytes = serde_json::to_vec(&IpcFrame::Request(request)).unwrap();
        write_frame(&mut stream, &bytes).await.unwrap();

        let payload = read_frame(&mut stream).await.unwrap();
        let IpcFrame::Response(response) = serde_json::from_slice(&payload).unwrap() else {
            panic!("Expected response frame");
        };
        assert_eq!(response.result, Some(Meta::Value { value: json!(5.0) }));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_request_is_rpc_error() {
        let mut handle = HostServer::start(app_state()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let request = IpcRequest::new("bogus-request", vec![], 9);
        let bytes = serde_json::to_vec(&IpcFrame::Request(request)).unwrap();
        write_frame(&mut stream, &bytes).await.unwrap();

        let payload = read_frame(&mut stream).await.unwrap();
        let IpcFrame::Response(response) = serde_json::from_slice(&payload).unwrap() else {
            panic!("Expected response frame");
        };
        let error = response.error.unwrap();
        assert!(error.message.contains("unknown request"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_missing_module_is_exception_meta() {
        let mut handle = HostServer::start(app_state()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let request = IpcRequest::new("require-module", vec![json!("nope")], 3);
        let bytes = serde_json::to_vec(&IpcFrame::Request(request)).unwrap();
        write_frame(&mut stream, &bytes).await.unwrap();

        let payload = read_frame(&mut stream).await.unwrap();
        let IpcFrame::Response(response) = serde_json::from_slice(&payload).unwrap() else {
            panic!("Expected response frame");
        };
        assert!(response.error.is_none());
        assert!(matches!(response.result, Some(Meta::Exception { .. })));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_object_released_notice_frees_registry_entry() {
        let state = app_state();
        let mut handle = HostServer::start(state.clone()).await.unwrap();
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();

        let request = IpcRequest::new("require-module", vec![json!("app")], 1);
        let bytes = serde_json::to_vec(&IpcFrame::Request(request)).unwrap();
        write_frame(&mut stream, &bytes).await.unwrap();
        let payload = read_frame(&mut stream).await.unwrap();
        let IpcFrame::Response(response) = serde_json::from_slice(&payload).unwrap() else {
            panic!("Expected response frame");
        };
        let Some(Meta::Object { id: Some(id), .. }) = response.result else {
            panic!("Expected object meta");
        };
        assert_eq!(state.registry().len(), 1);

        let notice = IpcRequest::notification("object-released", vec![json!(id)]);
        let bytes = serde_json::to_vec(&IpcFrame::Request(notice)).unwrap();
        write_frame(&mut stream, &bytes).await.unwrap();

        // The notice is processed by the connection task; poll briefly.
        for _ in 0..50 {
            if state.registry().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(state.registry().is_empty());

        handle.shutdown();
    }
}
