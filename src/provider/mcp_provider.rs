//! Provider backed by a Garmin-style tool server speaking JSON-RPC over stdio

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{DataProvider, ProviderError};
use crate::config::WorkerCommand;
use crate::mcp::McpClient;

pub const GARMIN_PROVIDER: &str = "garmin";

/// Tool names exposed by the worker
mod tools {
  pub const LIST_ACTIVITIES: &str = "get_activities";
  pub const ACTIVITY: &str = "get_activity";
  pub const ACTIVITY_SPLITS: &str = "get_activity_splits";
  pub const DAILY_STATS: &str = "get_stats";
  pub const SLEEP: &str = "get_sleep_data";
  pub const HRV: &str = "get_hrv_data";
  pub const BODY_COMPOSITION: &str = "get_body_composition";
}

pub struct McpDataProvider {
  name: String,
  client: McpClient,
}

impl McpDataProvider {
  pub fn new(worker: WorkerCommand, request_timeout: Duration) -> Self {
    let client = McpClient::new(Some(worker)).with_request_timeout(request_timeout);
    Self::from_client(GARMIN_PROVIDER, client)
  }

  pub fn from_client(name: impl Into<String>, client: McpClient) -> Self {
    Self {
      name: name.into(),
      client,
    }
  }

  pub fn client(&self) -> &McpClient {
    &self.client
  }

  async fn call(&self, tool: &str, arguments: Value) -> Result<Value, ProviderError> {
    debug!(provider = %self.name, tool, "Calling provider tool");
    Ok(self.client.call_tool(tool, arguments).await?)
  }
}

fn iso(date: NaiveDate) -> String {
  date.format("%Y-%m-%d").to_string()
}

#[async_trait]
impl DataProvider for McpDataProvider {
  fn name(&self) -> &str {
    &self.name
  }

  async fn connect(&self) -> Result<(), ProviderError> {
    self.client.connect().await?;
    Ok(())
  }

  async fn shutdown(&self) {
    self.client.disconnect().await;
  }

  async fn list_activities(&self, limit: u32) -> Result<Value, ProviderError> {
    self.call(tools::LIST_ACTIVITIES, json!({ "limit": limit })).await
  }

  async fn get_activity(&self, activity_id: &str) -> Result<Value, ProviderError> {
    self
      .call(tools::ACTIVITY, json!({ "activity_id": activity_id }))
      .await
  }

  async fn get_activity_splits(&self, activity_id: &str) -> Result<Value, ProviderError> {
    self
      .call(tools::ACTIVITY_SPLITS, json!({ "activity_id": activity_id }))
      .await
  }

  async fn get_daily_summary(&self, date: NaiveDate) -> Result<Value, ProviderError> {
    self.call(tools::DAILY_STATS, json!({ "date": iso(date) })).await
  }

  async fn get_sleep_data(&self, date: NaiveDate) -> Result<Value, ProviderError> {
    self.call(tools::SLEEP, json!({ "date": iso(date) })).await
  }

  async fn get_hrv_data(&self, date: NaiveDate) -> Result<Value, ProviderError> {
    self.call(tools::HRV, json!({ "date": iso(date) })).await
  }

  async fn get_body_composition(&self, start: NaiveDate, end: NaiveDate) -> Result<Value, ProviderError> {
    self
      .call(
        tools::BODY_COMPOSITION,
        json!({ "start_date": iso(start), "end_date": iso(end) }),
      )
      .await
  }
}
