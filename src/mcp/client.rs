//! JSON-RPC client over a `MessageChannel`
//!
//! Requests carry monotonically increasing integer ids. Each in-flight request
//! parks a oneshot sender in the pending table; the dispatcher task resolves
//! it when the matching response arrives, or rejects everything when the
//! worker goes away.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::channel::{ChannelError, Inbound, MessageChannel};
use super::protocol::{
  unwrap_tool_result, ClientInfo, Incoming, JsonRpcErrorReply, JsonRpcNotification, JsonRpcRequest,
  RpcErrorObject, ToolOutput, JSONRPC_VERSION, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use super::ProtocolError;
use crate::config::WorkerCommand;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Waiter = oneshot::Sender<Result<Value, ProtocolError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  Ready,
}

/// One live link to a worker
struct Connection {
  channel: MessageChannel,
  pending: Mutex<HashMap<u64, Waiter>>,
  ready: AtomicBool,
}

impl Connection {
  fn is_ready(&self) -> bool {
    self.ready.load(Ordering::SeqCst) && !self.channel.is_closed()
  }

  /// Fail every in-flight request with `ConnectionClosed`. Returns how many.
  async fn reject_pending(&self) -> usize {
    let waiters: Vec<Waiter> = self.pending.lock().await.drain().map(|(_, w)| w).collect();
    let count = waiters.len();
    for waiter in waiters {
      let _ = waiter.send(Err(ProtocolError::ConnectionClosed));
    }
    count
  }

  async fn shutdown(&self) {
    self.ready.store(false, Ordering::SeqCst);
    self.channel.close().await;
    self.reject_pending().await;
  }
}

pub struct McpClient {
  worker: Option<WorkerCommand>,
  client_info: ClientInfo,
  request_timeout: Duration,
  next_id: AtomicU64,
  connecting: AtomicBool,
  connection: RwLock<Option<Arc<Connection>>>,
  handshake: Mutex<()>,
}

impl McpClient {
  /// A client that spawns `worker` on `connect()`. Without a command only
  /// `connect_io` can bring it up.
  pub fn new(worker: Option<WorkerCommand>) -> Self {
    Self {
      worker,
      client_info: ClientInfo::default(),
      request_timeout: DEFAULT_REQUEST_TIMEOUT,
      next_id: AtomicU64::new(1),
      connecting: AtomicBool::new(false),
      connection: RwLock::new(None),
      handshake: Mutex::new(()),
    }
  }

  pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
    self.request_timeout = timeout;
    self
  }

  pub async fn state(&self) -> ConnectionState {
    if self.connecting.load(Ordering::SeqCst) {
      return ConnectionState::Connecting;
    }
    match self.connection.read().await.as_ref() {
      Some(connection) if connection.is_ready() => ConnectionState::Ready,
      _ => ConnectionState::Disconnected,
    }
  }

  /// Number of requests still waiting for a response
  pub async fn pending_requests(&self) -> usize {
    match self.connection.read().await.as_ref() {
      Some(connection) => connection.pending.lock().await.len(),
      None => 0,
    }
  }

  // ---------------------------------------------------------------------------
  // Lifecycle
  // ---------------------------------------------------------------------------

  /// Spawn the worker and run the handshake. No-op when already ready.
  pub async fn connect(&self) -> Result<(), ProtocolError> {
    let worker = self.worker.clone();
    self
      .connect_with(move || {
        let worker = worker.ok_or(ProtocolError::NoWorker)?;
        MessageChannel::spawn(&worker).map_err(ProtocolError::from)
      })
      .await
  }

  /// Run the handshake over an existing byte stream pair.
  pub async fn connect_io<R, W>(&self, reader: R, writer: W) -> Result<(), ProtocolError>
  where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
  {
    self
      .connect_with(move || Ok(MessageChannel::from_io(reader, writer)))
      .await
  }

  async fn connect_with<F>(&self, open: F) -> Result<(), ProtocolError>
  where
    F: FnOnce() -> Result<(MessageChannel, Inbound), ProtocolError>,
  {
    let _handshake = self.handshake.lock().await;
    if self.state().await == ConnectionState::Ready {
      return Ok(());
    }

    self.connecting.store(true, Ordering::SeqCst);
    let result = match open() {
      Ok((channel, inbound)) => self.establish(channel, inbound).await,
      Err(e) => Err(e),
    };
    self.connecting.store(false, Ordering::SeqCst);

    if let Err(e) = &result {
      warn!(error = %e, "Worker connection failed");
    }
    result
  }

  async fn establish(&self, channel: MessageChannel, inbound: Inbound) -> Result<(), ProtocolError> {
    if let Some(stale) = self.connection.write().await.take() {
      stale.shutdown().await;
    }

    let connection = Arc::new(Connection {
      channel,
      pending: Mutex::new(HashMap::new()),
      ready: AtomicBool::new(false),
    });
    tokio::spawn(dispatch(inbound, Arc::downgrade(&connection)));

    let params = json!({
      "protocolVersion": PROTOCOL_VERSION,
      "capabilities": {},
      "clientInfo": self.client_info,
    });

    let handshake = async {
      let result = self.request(&connection, "initialize", params).await?;
      debug!(server = ?result.get("serverInfo"), "initialize accepted");
      send_notification(&connection, "notifications/initialized", None).await
    }
    .await;

    match handshake {
      Ok(()) => {
        connection.ready.store(true, Ordering::SeqCst);
        *self.connection.write().await = Some(connection);
        info!("Worker connection ready");
        Ok(())
      }
      Err(e) => {
        connection.shutdown().await;
        Err(ProtocolError::Handshake(e.to_string()))
      }
    }
  }

  /// Close the worker link. Every pending request fails with
  /// `ConnectionClosed`.
  pub async fn disconnect(&self) {
    let connection = self.connection.write().await.take();
    if let Some(connection) = connection {
      let in_flight = connection.pending.lock().await.len();
      connection.shutdown().await;
      info!(in_flight, "Worker connection closed");
    }
  }

  // ---------------------------------------------------------------------------
  // Calls
  // ---------------------------------------------------------------------------

  pub async fn invoke(&self, method: &str, params: Value) -> Result<Value, ProtocolError> {
    let connection = self.ready_connection().await?;
    self.request(&connection, method, params).await
  }

  /// Fire-and-forget message; the worker sends nothing back
  pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ProtocolError> {
    let connection = self.ready_connection().await?;
    send_notification(&connection, method, params).await
  }

  /// `tools/call` with the content envelope unwrapped.
  pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProtocolError> {
    let params = json!({ "name": name, "arguments": arguments });
    let result = self.invoke("tools/call", params).await?;
    match unwrap_tool_result(result) {
      ToolOutput::Value(value) => Ok(value),
      ToolOutput::Failed(message) => Err(ProtocolError::Tool {
        tool: name.to_string(),
        message,
      }),
    }
  }

  /// Names of the tools the worker advertises
  pub async fn list_tools(&self) -> Result<Vec<String>, ProtocolError> {
    let result = self.invoke("tools/list", json!({})).await?;
    let tools = result
      .get("tools")
      .and_then(Value::as_array)
      .ok_or_else(|| ProtocolError::Decode("tools/list result has no `tools` array".to_string()))?;

    Ok(
      tools
        .iter()
        .filter_map(|tool| tool.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect(),
    )
  }

  async fn ready_connection(&self) -> Result<Arc<Connection>, ProtocolError> {
    match self.connection.read().await.as_ref() {
      Some(connection) if connection.is_ready() => Ok(connection.clone()),
      _ => Err(ProtocolError::NotConnected),
    }
  }

  async fn request(
    &self,
    connection: &Connection,
    method: &str,
    params: Value,
  ) -> Result<Value, ProtocolError> {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = oneshot::channel();
    connection.pending.lock().await.insert(id, tx);

    // The dispatcher rejects the table once after close; a waiter inserted
    // later would never be resolved
    if connection.channel.is_closed() {
      connection.pending.lock().await.remove(&id);
      return Err(ProtocolError::ConnectionClosed);
    }

    if let Err(e) = connection
      .channel
      .send_json(&JsonRpcRequest::new(id, method, params))
      .await
    {
      connection.pending.lock().await.remove(&id);
      return Err(match e {
        ChannelError::Closed => ProtocolError::ConnectionClosed,
        other => ProtocolError::Channel(other),
      });
    }
    debug!(request_id = id, method, "Sent request");

    match tokio::time::timeout(self.request_timeout, rx).await {
      Ok(Ok(result)) => result,
      Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
      Err(_) => {
        connection.pending.lock().await.remove(&id);
        warn!(request_id = id, method, timeout = ?self.request_timeout, "Request timed out");
        Err(ProtocolError::Timeout {
          method: method.to_string(),
          after: self.request_timeout,
        })
      }
    }
  }
}

async fn send_notification(
  connection: &Connection,
  method: &str,
  params: Option<Value>,
) -> Result<(), ProtocolError> {
  connection
    .channel
    .send_json(&JsonRpcNotification::new(method, params))
    .await
    .map_err(ProtocolError::from)
}

/// Route inbound messages until the worker goes away.
async fn dispatch(mut inbound: Inbound, connection: Weak<Connection>) {
  while let Some(message) = inbound.recv().await {
    let Some(conn) = connection.upgrade() else {
      return;
    };

    match Incoming::classify(message) {
      Incoming::Response { id, outcome } => {
        let waiter = conn.pending.lock().await.remove(&id);
        match waiter {
          Some(waiter) => {
            let outcome = outcome.map_err(|e| ProtocolError::Rpc {
              code: e.code,
              message: e.message,
            });
            let _ = waiter.send(outcome);
          }
          None => debug!(request_id = id, "Response for unknown or expired request"),
        }
      }
      Incoming::Request { id, method } => {
        debug!(%method, "Rejecting worker-initiated request");
        let reply = JsonRpcErrorReply {
          jsonrpc: JSONRPC_VERSION,
          id,
          error: RpcErrorObject {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
            data: None,
          },
        };
        if let Err(e) = conn.channel.send_json(&reply).await {
          warn!(error = %e, "Failed to answer worker request");
        }
      }
      Incoming::Notification { method } => debug!(%method, "Worker notification"),
      Incoming::Invalid => warn!("Ignoring message that is neither a request nor a response"),
    }
  }

  if let Some(conn) = connection.upgrade() {
    conn.ready.store(false, Ordering::SeqCst);
    let rejected = conn.reject_pending().await;
    if rejected > 0 {
      warn!(rejected, "Worker went away with requests in flight");
    }
    debug!("Dispatcher stopped");
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
