//! Test utilities and helpers for integration and unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Provider payload factories
//! - An in-process tool server for the protocol client
//! - A scriptable `DataProvider` for orchestrator tests

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use crate::mcp::protocol::PROTOCOL_VERSION;
use crate::mcp::McpClient;
use crate::models::{CanonicalLap, CompletedWorkout};
use crate::normalize::fields;
use crate::provider::{DataProvider, ProviderError};

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  // Run migrations
  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// Seed a planned (not yet executed) workout. Returns its id.
pub async fn seed_planned_workout(pool: &SqlitePool, user_id: &str, date: &str, name: &str) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO workouts (user_id, status, scheduled_date, name, activity_type)
    VALUES (?1, 'planned', ?2, ?3, 'running')
    "#,
  )
  .bind(user_id)
  .bind(date)
  .bind(name)
  .execute(pool)
  .await
  .expect("Failed to seed planned workout")
  .last_insert_rowid()
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

/// A 6 mile run at 8:00/mi with two laps
pub fn mock_completed_workout(provider_activity_id: &str, date: &str) -> CompletedWorkout {
  let scheduled_date = NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("mock date must be YYYY-MM-DD");
  let lap = |lap_number: i64, average_heartrate: i64| CanonicalLap {
    lap_number,
    distance_miles: 3.0,
    duration_minutes: 24.0,
    pace: Some("8:00".to_string()),
    average_heartrate,
    average_cadence: 172,
    elevation_change_feet: 12,
  };

  CompletedWorkout {
    provider_activity_id: provider_activity_id.to_string(),
    name: "Morning Run".to_string(),
    activity_type: "running".to_string(),
    scheduled_date,
    started_at: scheduled_date.and_hms_opt(7, 0, 0),
    duration_minutes: Some(48.0),
    distance_miles: Some(6.0),
    pace: Some("8:00".to_string()),
    average_heartrate: Some(148),
    max_heartrate: Some(171),
    average_cadence: Some(172),
    average_watts: None,
    elevation_gain_feet: Some(328),
    training_load: Some(87.5),
    aerobic_training_effect: Some(3.1),
    calories: Some(612),
    raw_json: json!({ "activityId": provider_activity_id }).to_string(),
    laps: vec![lap(1, 145), lap(2, 151)],
  }
}

/// Activity as the list call returns it (flat, SI units)
pub fn mock_activity_summary(id: u64, start_time_local: &str, meters: f64, seconds: f64) -> Value {
  json!({
    "activityId": id,
    "activityName": "Morning Run",
    "activityType": { "typeKey": "running" },
    "startTimeLocal": start_time_local,
    "distance": meters,
    "duration": seconds,
    "averageHR": 148.0,
    "maxHR": 171.0,
    "elevationGain": 100.0,
    "calories": 612.0
  })
}

/// Activity detail: identity at the top, metrics under `summaryDTO`
pub fn mock_activity_detail(id: u64, start_time_local: &str, meters: f64, seconds: f64) -> Value {
  json!({
    "activityId": id,
    "activityName": "Morning Run",
    "activityTypeDTO": { "typeKey": "running" },
    "summaryDTO": {
      "startTimeLocal": start_time_local,
      "distance": meters,
      "duration": seconds,
      "averageHR": 148.0,
      "maxHR": 171.0,
      "elevationGain": 100.0,
      "averageRunCadence": 172.0,
      "activityTrainingLoad": 87.5,
      "trainingEffect": 3.1
    }
  })
}

pub fn mock_daily_summary(date: &str) -> Value {
  json!({
    "calendarDate": date,
    "totalSteps": 11234,
    "totalKilocalories": 2650.0,
    "activeKilocalories": 820.0,
    "restingHeartRate": 48,
    "averageStressLevel": 27,
    "bodyBatteryHighestValue": 92,
    "bodyBatteryLowestValue": 21,
    "averageSpo2": 96.5
  })
}

pub fn mock_sleep(date: &str) -> Value {
  json!({
    "dailySleepDTO": {
      "calendarDate": date,
      "sleepTimeSeconds": 27000,
      "deepSleepSeconds": 5430,
      "lightSleepSeconds": 14400,
      "remSleepSeconds": 6000,
      "awakeSleepSeconds": 1170,
      "sleepScores": { "overall": { "value": 84 } }
    }
  })
}

pub fn mock_hrv(date: &str) -> Value {
  json!({
    "hrvSummary": {
      "calendarDate": date,
      "lastNightAvg": 52,
      "weeklyAvg": 49,
      "status": "BALANCED"
    }
  })
}

/// Two one-mile laps
pub fn mock_splits() -> Value {
  json!({
    "lapDTOs": [
      { "lapIndex": 1, "distance": 1609.34, "duration": 480.0, "averageHR": 145.0, "averageRunCadence": 170.0 },
      { "lapIndex": 2, "distance": 1609.34, "duration": 470.0, "averageHR": 152.0, "averageRunCadence": 174.0 }
    ]
  })
}

/// ---------------------------------------------------------------------------
/// In-process tool server
/// ---------------------------------------------------------------------------

/// The worker end of an in-memory pipe. Reads what the client writes and
/// answers as a JSON-RPC tool server would.
pub struct FakeWorker {
  lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
  writer: WriteHalf<DuplexStream>,
}

impl FakeWorker {
  /// Next message written by the client. Panics if the client hung up.
  pub async fn recv(&mut self) -> Value {
    loop {
      let line = self
        .lines
        .next_line()
        .await
        .expect("Failed to read from client")
        .expect("Client closed the pipe");
      if line.trim().is_empty() {
        continue;
      }
      return serde_json::from_str(&line).expect("Client wrote invalid JSON");
    }
  }

  pub async fn send(&mut self, message: Value) {
    let mut line = message.to_string();
    line.push('\n');
    self
      .writer
      .write_all(line.as_bytes())
      .await
      .expect("Failed to write to client");
  }

  pub async fn respond(&mut self, request: &Value, result: Value) {
    self
      .send(json!({ "jsonrpc": "2.0", "id": request["id"].clone(), "result": result }))
      .await;
  }

  pub async fn respond_error(&mut self, request: &Value, code: i64, message: &str) {
    self
      .send(json!({
        "jsonrpc": "2.0",
        "id": request["id"].clone(),
        "error": { "code": code, "message": message }
      }))
      .await;
  }

  /// Answer a `tools/call` with a single text content block
  pub async fn respond_tool_text(&mut self, request: &Value, text: &str, is_error: bool) {
    self
      .respond(
        request,
        json!({ "content": [{ "type": "text", "text": text }], "isError": is_error }),
      )
      .await;
  }
}

/// Client-side halves of an in-memory pipe plus the worker on the other end
pub fn worker_pair() -> (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>, FakeWorker) {
  let (client_end, worker_end) = tokio::io::duplex(64 * 1024);
  let (client_reader, client_writer) = tokio::io::split(client_end);
  let (worker_reader, worker_writer) = tokio::io::split(worker_end);

  let worker = FakeWorker {
    lines: BufReader::new(worker_reader).lines(),
    writer: worker_writer,
  };
  (client_reader, client_writer, worker)
}

/// A client that has completed the handshake against a `FakeWorker`
pub async fn connected_client(request_timeout: Duration) -> (McpClient, FakeWorker) {
  let (reader, writer, mut worker) = worker_pair();
  let client = McpClient::new(None).with_request_timeout(request_timeout);

  let handshake = async {
    let init = worker.recv().await;
    assert_eq!(init["method"], "initialize");
    worker
      .respond(
        &init,
        json!({
          "protocolVersion": PROTOCOL_VERSION,
          "capabilities": { "tools": {} },
          "serverInfo": { "name": "fake-garmin", "version": "0.0.0" }
        }),
      )
      .await;
    let initialized = worker.recv().await;
    assert_eq!(initialized["method"], "notifications/initialized");
  };

  let (connected, ()) = tokio::join!(client.connect_io(reader, writer), handshake);
  connected.expect("Handshake with fake worker failed");
  (client, worker)
}

/// ---------------------------------------------------------------------------
/// Scriptable provider
/// ---------------------------------------------------------------------------

/// `DataProvider` operations, for scripting failures and reading the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeCall {
  Connect,
  ListActivities,
  Detail,
  Splits,
  DailySummary,
  Sleep,
  Hrv,
  BodyComposition,
}

#[derive(Debug, Clone, Default)]
struct FakeData {
  activities: Vec<Value>,
  details: HashMap<String, Value>,
  splits: HashMap<String, Value>,
  daily: HashMap<NaiveDate, Value>,
  sleep: HashMap<NaiveDate, Value>,
  hrv: HashMap<NaiveDate, Value>,
  body_composition: Option<Value>,
  failures: HashMap<FakeCall, ProviderError>,
  dated_failures: HashMap<(FakeCall, NaiveDate), ProviderError>,
}

/// In-memory provider. Clones share the call log and shutdown flag, so a
/// test can keep one handle after boxing another into an engine.
///
/// Anything not scripted answers the way the tool server does when it has
/// no data: empty objects, empty lists or a plain-text note.
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
  data: Arc<FakeData>,
  calls: Arc<Mutex<Vec<FakeCall>>>,
  shut_down: Arc<AtomicBool>,
}

fn day(raw: &str) -> NaiveDate {
  NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("mock date must be YYYY-MM-DD")
}

impl FakeProvider {
  pub fn new() -> Self {
    Self::default()
  }

  fn data_mut(&mut self) -> &mut FakeData {
    Arc::make_mut(&mut self.data)
  }

  pub fn with_activity(mut self, summary: Value) -> Self {
    self.data_mut().activities.push(summary);
    self
  }

  /// Detail payload, keyed by its own `activityId`
  pub fn with_detail(mut self, detail: Value) -> Self {
    let id = detail
      .get("activityId")
      .and_then(fields::as_identifier)
      .expect("detail payload needs an activityId");
    self.data_mut().details.insert(id, detail);
    self
  }

  pub fn with_splits(mut self, activity_id: &str, splits: Value) -> Self {
    self.data_mut().splits.insert(activity_id.to_string(), splits);
    self
  }

  pub fn with_daily(mut self, date: &str, payload: Value) -> Self {
    self.data_mut().daily.insert(day(date), payload);
    self
  }

  pub fn with_sleep(mut self, date: &str, payload: Value) -> Self {
    self.data_mut().sleep.insert(day(date), payload);
    self
  }

  pub fn with_hrv(mut self, date: &str, payload: Value) -> Self {
    self.data_mut().hrv.insert(day(date), payload);
    self
  }

  /// Daily summary, sleep and HRV mocks for each date
  pub fn with_health_for(self, dates: &[&str]) -> Self {
    dates.iter().fold(self, |provider, date| {
      provider
        .with_daily(date, mock_daily_summary(date))
        .with_sleep(date, mock_sleep(date))
        .with_hrv(date, mock_hrv(date))
    })
  }

  pub fn with_body_composition(mut self, payload: Value) -> Self {
    self.data_mut().body_composition = Some(payload);
    self
  }

  /// Every call of `call` fails with `error`
  pub fn failing(mut self, call: FakeCall, error: ProviderError) -> Self {
    self.data_mut().failures.insert(call, error);
    self
  }

  /// Only the `call` for `date` fails; other dates answer normally
  pub fn failing_on(mut self, call: FakeCall, date: &str, error: ProviderError) -> Self {
    self.data_mut().dated_failures.insert((call, day(date)), error);
    self
  }

  pub fn was_shut_down(&self) -> bool {
    self.shut_down.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> Vec<FakeCall> {
    self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
  }

  fn record(&self, call: FakeCall) -> Result<(), ProviderError> {
    if let Ok(mut calls) = self.calls.lock() {
      calls.push(call);
    }
    match self.data.failures.get(&call) {
      Some(error) => Err(error.clone()),
      None => Ok(()),
    }
  }

  fn record_on(&self, call: FakeCall, date: NaiveDate) -> Result<(), ProviderError> {
    self.record(call)?;
    match self.data.dated_failures.get(&(call, date)) {
      Some(error) => Err(error.clone()),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl DataProvider for FakeProvider {
  fn name(&self) -> &str {
    "fake"
  }

  async fn connect(&self) -> Result<(), ProviderError> {
    self.record(FakeCall::Connect)
  }

  async fn shutdown(&self) {
    self.shut_down.store(true, Ordering::SeqCst);
  }

  async fn list_activities(&self, limit: u32) -> Result<Value, ProviderError> {
    self.record(FakeCall::ListActivities)?;
    let activities: Vec<Value> = self.data.activities.iter().take(limit as usize).cloned().collect();
    Ok(Value::Array(activities))
  }

  async fn get_activity(&self, activity_id: &str) -> Result<Value, ProviderError> {
    self.record(FakeCall::Detail)?;
    self
      .data
      .details
      .get(activity_id)
      .cloned()
      .ok_or_else(|| ProviderError::Tool(format!("Activity {} not found", activity_id)))
  }

  async fn get_activity_splits(&self, activity_id: &str) -> Result<Value, ProviderError> {
    self.record(FakeCall::Splits)?;
    Ok(self.data.splits.get(activity_id).cloned().unwrap_or_else(|| json!([])))
  }

  async fn get_daily_summary(&self, date: NaiveDate) -> Result<Value, ProviderError> {
    self.record_on(FakeCall::DailySummary, date)?;
    Ok(self.data.daily.get(&date).cloned().unwrap_or_else(|| json!({})))
  }

  async fn get_sleep_data(&self, date: NaiveDate) -> Result<Value, ProviderError> {
    self.record_on(FakeCall::Sleep, date)?;
    Ok(
      self
        .data
        .sleep
        .get(&date)
        .cloned()
        .unwrap_or_else(|| json!(format!("No sleep data found for {}", date))),
    )
  }

  async fn get_hrv_data(&self, date: NaiveDate) -> Result<Value, ProviderError> {
    self.record_on(FakeCall::Hrv, date)?;
    Ok(self.data.hrv.get(&date).cloned().unwrap_or(Value::Null))
  }

  async fn get_body_composition(&self, _start: NaiveDate, _end: NaiveDate) -> Result<Value, ProviderError> {
    self.record(FakeCall::BodyComposition)?;
    Ok(
      self
        .data
        .body_composition
        .clone()
        .unwrap_or_else(|| json!({ "dateWeightList": [] })),
    )
  }
}

/// ---------------------------------------------------------------------------
/// Test Macros
/// ---------------------------------------------------------------------------

/// Assert two floats are approximately equal within a tolerance
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_db_creates_schema() {
    let pool = setup_test_db().await;

    // Verify key tables exist
    let tables: Vec<(String,)> = sqlx::query_as(
      "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('workouts', 'workout_laps', 'daily_health', 'body_composition')"
    )
    .fetch_all(&pool)
    .await
    .expect("Failed to query tables");

    assert_eq!(tables.len(), 4, "Expected 4 tables, got {}", tables.len());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_seed_planned_workout() {
    let pool = setup_test_db().await;

    let id = seed_planned_workout(&pool, "athlete-1", "2024-05-01", "Easy 6").await;
    let (status, name): (String, String) = sqlx::query_as("SELECT status, name FROM workouts WHERE id = ?1")
      .bind(id)
      .fetch_one(&pool)
      .await
      .expect("Failed to read seeded workout");

    assert_eq!(status, "planned");
    assert_eq!(name, "Easy 6");

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_fake_provider_scripts_and_logs_calls() {
    let provider = FakeProvider::new()
      .with_health_for(&["2024-05-01"])
      .failing(FakeCall::Hrv, ProviderError::Tool("HRV not available".into()));
    let handle = provider.clone();
    let date = day("2024-05-01");

    assert_eq!(provider.get_daily_summary(date).await.unwrap()["totalSteps"], 11234);
    assert!(provider.get_hrv_data(date).await.is_err());
    assert!(provider.get_sleep_data(day("2024-05-02")).await.unwrap().is_string());

    provider.shutdown().await;
    assert!(handle.was_shut_down());
    assert_eq!(handle.calls(), vec![FakeCall::DailySummary, FakeCall::Hrv, FakeCall::Sleep]);
  }

  #[tokio::test]
  async fn test_worker_pair_round_trip() {
    let (client_reader, mut client_writer, mut worker) = worker_pair();

    client_writer
      .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
      .await
      .unwrap();
    let request = worker.recv().await;
    assert_eq!(request["method"], "ping");

    worker.respond(&request, json!({})).await;
    let mut lines = BufReader::new(client_reader).lines();
    let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"], json!({}));
  }

  #[test]
  fn test_mock_splits_have_two_laps() {
    assert_eq!(mock_splits()["lapDTOs"].as_array().map(Vec::len), Some(2));
    let workout = mock_completed_workout("1001", "2024-05-01");
    assert_eq!(workout.laps.len(), 2);
    assert_eq!(workout.distance_miles, Some(6.0));
  }
}
