//! Data providers
//!
//! A `DataProvider` returns raw provider payloads (`serde_json::Value`); the
//! normalizer owns their shape. `mcp_provider` talks to a tool-server worker,
//! `registry` maps provider names to constructors.

pub mod mcp_provider;
pub mod registry;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::mcp::ProtocolError;

pub use mcp_provider::{McpDataProvider, GARMIN_PROVIDER};
pub use registry::{ProviderFactory, ProviderRegistry};

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
  /// The link to the provider is gone; nothing else in this run will work
  #[error("Provider connection failed: {0}")]
  Connection(String),

  #[error("Provider request timed out: {0}")]
  Timeout(String),

  #[error("Provider tool error: {0}")]
  Tool(String),

  #[error("Provider protocol error: {0}")]
  Protocol(String),

  #[error("Unknown provider: {0}")]
  NotRegistered(String),

  #[error("Provider configuration error: {0}")]
  Config(String),
}

impl ProviderError {
  pub fn is_connection(&self) -> bool {
    matches!(self, Self::Connection(_))
  }
}

impl From<ProtocolError> for ProviderError {
  fn from(err: ProtocolError) -> Self {
    if err.is_connection() {
      return Self::Connection(err.to_string());
    }
    match err {
      ProtocolError::Timeout { .. } => Self::Timeout(err.to_string()),
      ProtocolError::Tool { .. } => Self::Tool(err.to_string()),
      other => Self::Protocol(other.to_string()),
    }
  }
}

impl Serialize for ProviderError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Provider Contract
/// ---------------------------------------------------------------------------

#[async_trait]
pub trait DataProvider: Send + Sync {
  fn name(&self) -> &str;

  async fn connect(&self) -> Result<(), ProviderError>;

  /// Release the provider. Safe to call more than once.
  async fn shutdown(&self);

  /// Most recent activities first, up to `limit`
  async fn list_activities(&self, limit: u32) -> Result<Value, ProviderError>;

  async fn get_activity(&self, activity_id: &str) -> Result<Value, ProviderError>;

  async fn get_activity_splits(&self, activity_id: &str) -> Result<Value, ProviderError>;

  async fn get_daily_summary(&self, date: NaiveDate) -> Result<Value, ProviderError>;

  async fn get_sleep_data(&self, date: NaiveDate) -> Result<Value, ProviderError>;

  async fn get_hrv_data(&self, date: NaiveDate) -> Result<Value, ProviderError>;

  async fn get_body_composition(&self, start: NaiveDate, end: NaiveDate) -> Result<Value, ProviderError>;
}
