//! Tool-server plumbing
//!
//! `channel` moves JSON lines to and from a worker process, `client` layers
//! JSON-RPC request/response correlation and the connection lifecycle on top,
//! and `protocol` holds the wire types.

pub mod channel;
pub mod client;
pub mod protocol;

use serde::Serialize;
use std::time::Duration;

pub use channel::{ChannelError, LineFramer, MessageChannel};
pub use client::{ConnectionState, McpClient};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
  #[error("Channel error: {0}")]
  Channel(#[source] ChannelError),

  #[error("Request `{method}` timed out after {after:?}")]
  Timeout { method: String, after: Duration },

  #[error("Connection closed")]
  ConnectionClosed,

  #[error("RPC error {code}: {message}")]
  Rpc { code: i64, message: String },

  #[error("Tool `{tool}` failed: {message}")]
  Tool { tool: String, message: String },

  #[error("Handshake failed: {0}")]
  Handshake(String),

  #[error("Not connected")]
  NotConnected,

  #[error("No worker command configured")]
  NoWorker,

  #[error("Unexpected response: {0}")]
  Decode(String),
}

impl ProtocolError {
  /// True when the worker link itself is gone or unusable, as opposed to a
  /// single call failing.
  pub fn is_connection(&self) -> bool {
    matches!(
      self,
      Self::Channel(_) | Self::ConnectionClosed | Self::Handshake(_) | Self::NotConnected | Self::NoWorker
    )
  }
}

impl From<ChannelError> for ProtocolError {
  fn from(err: ChannelError) -> Self {
    match err {
      ChannelError::Closed => Self::ConnectionClosed,
      other => Self::Channel(other),
    }
  }
}

impl Serialize for ProtocolError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}
