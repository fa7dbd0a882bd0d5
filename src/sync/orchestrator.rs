//! One sync run: activities, then per-day health, then body composition.
//!
//! Item-level failures (one activity, one metric for one day) are recorded in
//! `SyncResult::errors` and the run moves on. Only a lost provider connection
//! ends a run early.

use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{CancelFlag, SyncError, SyncLocks, SyncWindow};
use crate::config::SyncConfig;
use crate::models::{CanonicalActivity, CompletedWorkout, DailyHealthUpdate, SyncResult};
use crate::normalize::{
  fields, normalize_activity, normalize_body_composition, normalize_daily_summary, normalize_hrv,
  normalize_laps, normalize_sleep, NormalizeError,
};
use crate::provider::{DataProvider, ProviderError};
use crate::storage::{StorageError, SyncStore};

/// Why a run stopped before covering the window
enum Stop {
  Cancelled,
  Connection(String),
}

/// How one activity was written
enum Written {
  Inserted,
  MatchedPlan,
  Duplicate,
}

/// Failure while syncing a single activity
enum ItemError {
  Connection(String),
  Failed(String),
}

impl From<StorageError> for ItemError {
  fn from(err: StorageError) -> Self {
    Self::Failed(err.to_string())
  }
}

impl From<ProviderError> for ItemError {
  fn from(err: ProviderError) -> Self {
    if err.is_connection() {
      Self::Connection(err.to_string())
    } else {
      Self::Failed(err.to_string())
    }
  }
}

pub struct SyncEngine {
  provider: Box<dyn DataProvider>,
  store: Arc<dyn SyncStore>,
  config: SyncConfig,
  locks: Option<Arc<SyncLocks>>,
  cancel: CancelFlag,
}

impl SyncEngine {
  pub fn new(provider: Box<dyn DataProvider>, store: Arc<dyn SyncStore>, config: SyncConfig) -> Self {
    Self {
      provider,
      store,
      config,
      locks: None,
      cancel: CancelFlag::new(),
    }
  }

  /// Serialize runs per user through `locks`
  pub fn with_locks(mut self, locks: Arc<SyncLocks>) -> Self {
    self.locks = Some(locks);
    self
  }

  pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_flag(&self) -> CancelFlag {
    self.cancel.clone()
  }

  /// Sync `window` for `user_id`. The provider is shut down before this
  /// returns, whatever the outcome.
  pub async fn run(&self, user_id: &str, window: SyncWindow) -> Result<SyncResult, SyncError> {
    let _guard = match &self.locks {
      Some(locks) => Some(locks.acquire(user_id).await),
      None => None,
    };

    info!(
      user_id,
      provider = self.provider.name(),
      start = %window.start,
      end = %window.end,
      "Starting sync"
    );

    let mut result = SyncResult::default();
    let outcome = self.run_steps(user_id, &window, &mut result).await;
    self.provider.shutdown().await;

    match outcome {
      Ok(()) => {
        let result = result.finish();
        info!(
          user_id,
          activities = result.activities_synced,
          matched = result.planned_matched,
          skipped = result.activities_skipped,
          health_days = result.health_days_synced,
          body_composition = result.body_composition_synced,
          errors = result.errors.len(),
          "Sync complete"
        );
        Ok(result)
      }
      Err(Stop::Cancelled) => {
        warn!(user_id, "Sync cancelled");
        result.aborted = true;
        result.record_error("sync cancelled");
        Ok(result.finish())
      }
      Err(Stop::Connection(message)) => {
        error!(user_id, error = %message, "Sync aborted, provider connection lost");
        result.aborted = true;
        Err(SyncError::Connection {
          message,
          partial: result.finish(),
        })
      }
    }
  }

  async fn run_steps(&self, user_id: &str, window: &SyncWindow, result: &mut SyncResult) -> Result<(), Stop> {
    self.check_cancelled()?;
    self
      .provider
      .connect()
      .await
      .map_err(|e| Stop::Connection(e.to_string()))?;

    let families = self.config.families;
    if families.activities {
      self.sync_activities(user_id, window, result).await?;
    }
    if families.any_daily_health() {
      self.sync_daily_health(user_id, window, result).await?;
    }
    if families.body_composition {
      self.sync_body_composition(user_id, window, result).await?;
    }
    Ok(())
  }

  fn check_cancelled(&self) -> Result<(), Stop> {
    if self.cancel.is_cancelled() {
      return Err(Stop::Cancelled);
    }
    Ok(())
  }

  // ---------------------------------------------------------------------------
  // Activities
  // ---------------------------------------------------------------------------

  async fn sync_activities(&self, user_id: &str, window: &SyncWindow, result: &mut SyncResult) -> Result<(), Stop> {
    let payload = match self.provider.list_activities(self.config.activity_limit).await {
      Ok(payload) => payload,
      Err(e) if e.is_connection() => return Err(Stop::Connection(e.to_string())),
      Err(e) => {
        result.record_error(format!("Failed to list activities: {}", e));
        return Ok(());
      }
    };

    for summary in activity_list(&payload) {
      self.check_cancelled()?;

      let activity = match normalize_activity(summary) {
        Ok(activity) => activity,
        Err(e) => {
          result.record_error(format!("Skipping activity: {}", e));
          continue;
        }
      };
      let activity_id = activity.provider_activity_id.clone();

      let Some(date) = activity.local_date() else {
        result.record_error(format!("Activity {}: no start time", activity_id));
        continue;
      };
      if !window.contains(date) {
        debug!(activity_id = %activity_id, %date, "Activity outside sync window");
        continue;
      }

      match self.sync_activity(user_id, activity, date).await {
        Ok(Written::Inserted) => result.activities_synced += 1,
        Ok(Written::MatchedPlan) => {
          result.activities_synced += 1;
          result.planned_matched += 1;
        }
        Ok(Written::Duplicate) => result.activities_skipped += 1,
        Err(ItemError::Connection(message)) => return Err(Stop::Connection(message)),
        Err(ItemError::Failed(message)) => {
          warn!(user_id, activity_id = %activity_id, error = %message, "Activity sync failed");
          result.record_error(format!("Activity {}: {}", activity_id, message));
        }
      }
    }

    Ok(())
  }

  async fn sync_activity(
    &self,
    user_id: &str,
    summary: CanonicalActivity,
    date: NaiveDate,
  ) -> Result<Written, ItemError> {
    let activity_id = summary.provider_activity_id.clone();

    if self
      .store
      .find_by_provider_id(user_id, &activity_id)
      .await?
      .is_some()
    {
      debug!(activity_id = %activity_id, "Activity already stored");
      return Ok(Written::Duplicate);
    }

    let activity = if self.config.fetch_activity_details {
      self.fetch_detail(summary).await?
    } else {
      summary
    };

    let laps = match self.provider.get_activity_splits(&activity_id).await {
      Ok(payload) => normalize_laps(&payload),
      Err(e) if e.is_connection() => return Err(e.into()),
      Err(e) => {
        warn!(activity_id = %activity_id, error = %e, "Failed to fetch splits, storing without laps");
        Vec::new()
      }
    };

    let workout = CompletedWorkout::from_activity(activity, date, laps);
    match self
      .store
      .find_planned(user_id, date, self.config.match_window_days)
      .await?
    {
      Some(planned) => {
        self.store.update_workout(planned.id, &workout).await?;
        info!(user_id, activity_id = %activity_id, workout_id = planned.id, "Matched activity to plan");
        Ok(Written::MatchedPlan)
      }
      None => {
        let workout_id = self.store.insert_workout(user_id, &workout).await?;
        info!(user_id, activity_id = %activity_id, workout_id, "Stored unplanned activity");
        Ok(Written::Inserted)
      }
    }
  }

  /// The detail payload carries more metrics than the list entry. Fall back
  /// to the summary when it cannot be fetched or read.
  async fn fetch_detail(&self, summary: CanonicalActivity) -> Result<CanonicalActivity, ItemError> {
    let activity_id = summary.provider_activity_id.clone();
    let payload = match self.provider.get_activity(&activity_id).await {
      Ok(payload) => payload,
      Err(e) if e.is_connection() => return Err(e.into()),
      Err(e) => {
        warn!(activity_id = %activity_id, error = %e, "Failed to fetch activity detail, using summary");
        return Ok(summary);
      }
    };

    match normalize_activity(&payload) {
      Ok(mut detail) => {
        if detail.start_time.is_none() {
          detail.start_time = summary.start_time;
        }
        Ok(detail)
      }
      Err(e) => {
        warn!(activity_id = %activity_id, error = %e, "Unreadable activity detail, using summary");
        Ok(summary)
      }
    }
  }

  // ---------------------------------------------------------------------------
  // Daily health
  // ---------------------------------------------------------------------------

  async fn sync_daily_health(&self, user_id: &str, window: &SyncWindow, result: &mut SyncResult) -> Result<(), Stop> {
    let families = self.config.families;

    for date in window.dates() {
      self.check_cancelled()?;

      let daily = async {
        if families.daily {
          Some(self.provider.get_daily_summary(date).await)
        } else {
          None
        }
      };
      let sleep = async {
        if families.sleep {
          Some(self.provider.get_sleep_data(date).await)
        } else {
          None
        }
      };
      let hrv = async {
        if families.hrv {
          Some(self.provider.get_hrv_data(date).await)
        } else {
          None
        }
      };
      let (daily, sleep, hrv) = tokio::join!(daily, sleep, hrv);

      let mut update = DailyHealthUpdate::default();
      let mut lost_connection = None;

      if let Some(record) = absorb("daily summary", date, daily, normalize_daily_summary, result, &mut lost_connection) {
        update.apply_daily(&record);
      }
      if let Some(record) = absorb("sleep", date, sleep, normalize_sleep, result, &mut lost_connection) {
        update.apply_sleep(&record);
      }
      if let Some(record) = absorb("hrv", date, hrv, normalize_hrv, result, &mut lost_connection) {
        update.apply_hrv(&record);
      }

      if !update.is_empty() {
        match self.write_daily_health(user_id, date, &update).await {
          Ok(()) => result.health_days_synced += 1,
          Err(e) => {
            warn!(user_id, %date, error = %e, "Failed to store daily health");
            result.record_error(format!("{} health: {}", date, e));
          }
        }
      } else {
        debug!(%date, "No health data for date");
      }

      if let Some(message) = lost_connection {
        return Err(Stop::Connection(message));
      }
    }

    Ok(())
  }

  /// Check for the (user, date) row, then insert or merge into it
  async fn write_daily_health(
    &self,
    user_id: &str,
    date: NaiveDate,
    update: &DailyHealthUpdate,
  ) -> Result<(), StorageError> {
    match self.store.find_daily_health(user_id, date).await? {
      Some(existing) => self.store.update_daily_health(&existing, update).await,
      None => self
        .store
        .insert_daily_health(user_id, date, update)
        .await
        .map(|_| ()),
    }
  }

  // ---------------------------------------------------------------------------
  // Body composition
  // ---------------------------------------------------------------------------

  async fn sync_body_composition(
    &self,
    user_id: &str,
    window: &SyncWindow,
    result: &mut SyncResult,
  ) -> Result<(), Stop> {
    self.check_cancelled()?;

    let payload = match self.provider.get_body_composition(window.start, window.end).await {
      Ok(payload) => payload,
      Err(e) if e.is_connection() => return Err(Stop::Connection(e.to_string())),
      Err(e) => {
        result.record_error(format!("Body composition: {}", e));
        return Ok(());
      }
    };
    if !is_structured(&payload) {
      debug!("No body composition data");
      return Ok(());
    }

    for entry in normalize_body_composition(&payload) {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          result.record_error(format!("Body composition: {}", e));
          continue;
        }
      };
      if !window.contains(entry.date) {
        continue;
      }
      match self.store.upsert_body_composition(user_id, &entry).await {
        Ok(()) => result.body_composition_synced += 1,
        Err(e) => result.record_error(format!("{} body composition: {}", entry.date, e)),
      }
    }
    Ok(())
  }
}

/// Inspect one metric fetch. An item-level failure adds exactly one error
/// entry. A lost connection is only remembered, so the run can stop after this
/// date and report it once through `SyncError::Connection`.
fn absorb<T>(
  source: &str,
  date: NaiveDate,
  outcome: Option<Result<Value, ProviderError>>,
  normalize: fn(&Value) -> Result<Option<T>, NormalizeError>,
  result: &mut SyncResult,
  lost_connection: &mut Option<String>,
) -> Option<T> {
  let payload = match outcome? {
    Ok(payload) => payload,
    Err(e) if e.is_connection() => {
      if lost_connection.is_none() {
        *lost_connection = Some(e.to_string());
      }
      return None;
    }
    Err(e) => {
      warn!(%date, source, error = %e, "Health fetch failed");
      result.record_error(format!("{} {}: {}", date, source, e));
      return None;
    }
  };

  if !is_structured(&payload) {
    debug!(%date, source, "No data");
    return None;
  }

  match normalize(&stamp_date(payload, date)) {
    Ok(record) => record,
    Err(e) => {
      result.record_error(format!("{} {}: {}", date, source, e));
      None
    }
  }
}

/// Tool servers answer "nothing here" with plain text or an empty document
fn is_structured(payload: &Value) -> bool {
  (payload.is_object() || payload.is_array()) && !fields::is_empty_payload(payload)
}

/// Fill in the requested date for payloads that leave it implicit
fn stamp_date(mut payload: Value, date: NaiveDate) -> Value {
  if let Value::Object(map) = &mut payload {
    map
      .entry("calendarDate")
      .or_insert_with(|| json!(date.format("%Y-%m-%d").to_string()));
  }
  payload
}

/// `get_activities` answers with a bare list or `{"activities": [..]}`
fn activity_list(payload: &Value) -> &[Value] {
  match payload {
    Value::Array(items) => items,
    Value::Object(_) => payload
      .get("activities")
      .and_then(Value::as_array)
      .map(Vec::as_slice)
      .unwrap_or_default(),
    _ => &[],
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::MetricFamilies;
  use crate::models::WorkoutStatus;
  use crate::storage::SqliteStore;
  use crate::test_utils::*;
  use serde_json::json;

  fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
  }

  /// 2024-05-01 .. 2024-05-03
  fn window() -> SyncWindow {
    SyncWindow::new(date("2024-05-01"), date("2024-05-03"))
  }

  fn engine(provider: &FakeProvider, store: &SqliteStore, config: SyncConfig) -> SyncEngine {
    SyncEngine::new(Box::new(provider.clone()), Arc::new(store.clone()), config)
  }

  fn activities_only() -> SyncConfig {
    SyncConfig {
      families: MetricFamilies {
        activities: true,
        ..MetricFamilies::none()
      },
      ..SyncConfig::default()
    }
  }

  fn health_only() -> SyncConfig {
    SyncConfig {
      families: MetricFamilies {
        daily: true,
        sleep: true,
        hrv: true,
        ..MetricFamilies::none()
      },
      ..SyncConfig::default()
    }
  }

  #[tokio::test]
  async fn test_sync_is_idempotent() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-05-01 07:00:00", 9656.06, 2880.0))
      .with_activity(mock_activity_summary(1002, "2024-05-02 18:00:00", 8046.72, 2400.0))
      .with_health_for(&["2024-05-01", "2024-05-02", "2024-05-03"]);

    let first = engine(&provider, &store, SyncConfig::default())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(first.activities_synced, 2);
    assert_eq!(first.health_days_synced, 3);
    assert!(first.errors.is_empty(), "unexpected errors: {:?}", first.errors);
    assert!(first.completed_at.is_some());

    let second = engine(&provider, &store, SyncConfig::default())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(second.activities_synced, 0);
    assert_eq!(second.activities_skipped, 2);

    let workouts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workouts")
      .fetch_one(&pool)
      .await
      .unwrap();
    let health_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_health")
      .fetch_one(&pool)
      .await
      .unwrap();
    assert_eq!(workouts, 2);
    assert_eq!(health_rows, 3);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_activity_completes_planned_workout() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let planned = seed_planned_workout(&pool, "athlete-1", "2024-05-01", "Easy 6").await;

    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-05-01 07:00:00", 9656.06, 2880.0))
      .with_detail(mock_activity_detail(1001, "2024-05-01 07:00:00", 9656.06, 2880.0))
      .with_splits("1001", mock_splits());

    let result = engine(&provider, &store, activities_only())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.activities_synced, 1);
    assert_eq!(result.planned_matched, 1);

    let record = store.find_workout(planned).await.unwrap().unwrap();
    assert_eq!(record.id, planned);
    assert_eq!(record.status(), Some(WorkoutStatus::Completed));
    assert_eq!(record.provider_activity_id.as_deref(), Some("1001"));
    assert_eq!(record.distance_miles, Some(6.0));
    assert_eq!(record.duration_minutes, Some(48.0));
    assert_eq!(record.pace.as_deref(), Some("8:00"));
    // Detail payload contributes cadence and training load
    assert_eq!(record.average_cadence, Some(172));
    assert_eq!(record.training_load, Some(87.5));

    let laps = store.laps_for_workout(planned).await.unwrap();
    assert_eq!(laps.len(), 2);
    assert_eq!(laps[1].average_heartrate, 152);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workouts")
      .fetch_one(&pool)
      .await
      .unwrap();
    assert_eq!(total, 1);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_activity_on_other_day_does_not_match_by_default() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let planned = seed_planned_workout(&pool, "athlete-1", "2024-05-02", "Tempo").await;

    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-05-01 07:00:00", 9656.06, 2880.0));

    let result = engine(&provider, &store, activities_only())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.activities_synced, 1);
    assert_eq!(result.planned_matched, 0);

    let record = store.find_workout(planned).await.unwrap().unwrap();
    assert_eq!(record.status(), Some(WorkoutStatus::Planned));

    // With a one-day tolerance the same activity completes the plan
    let pool2 = setup_test_db().await;
    let store2 = SqliteStore::new(pool2.clone());
    let planned2 = seed_planned_workout(&pool2, "athlete-1", "2024-05-02", "Tempo").await;
    let config = SyncConfig {
      match_window_days: 1,
      ..activities_only()
    };
    let result = engine(&provider, &store2, config)
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.planned_matched, 1);
    let record = store2.find_workout(planned2).await.unwrap().unwrap();
    assert_eq!(record.status(), Some(WorkoutStatus::Completed));
    assert_eq!(record.scheduled_date, date("2024-05-02"));

    teardown_test_db(pool).await;
    teardown_test_db(pool2).await;
  }

  #[tokio::test]
  async fn test_activities_outside_window_are_ignored() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-04-20 07:00:00", 5000.0, 1500.0))
      .with_activity(mock_activity_summary(1002, "2024-05-03 07:00:00", 5000.0, 1500.0));

    let result = engine(&provider, &store, activities_only())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.activities_synced, 1);
    assert!(store.find_by_provider_id("athlete-1", "1001").await.unwrap().is_none());
    assert!(store.find_by_provider_id("athlete-1", "1002").await.unwrap().is_some());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_detail_and_split_failures_fall_back() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-05-01 07:00:00", 9656.06, 2880.0))
      .failing(FakeCall::Detail, ProviderError::Tool("activity not found".into()))
      .failing(FakeCall::Splits, ProviderError::Timeout("tools/call".into()));

    let result = engine(&provider, &store, activities_only())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.activities_synced, 1);
    assert!(result.errors.is_empty());

    let record = store
      .find_by_provider_id("athlete-1", "1001")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(record.distance_miles, Some(6.0));
    assert!(store.laps_for_workout(record.id).await.unwrap().is_empty());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_malformed_activity_is_recorded_and_skipped() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_activity(json!({ "activityName": "No id run", "startTimeLocal": "2024-05-01 07:00:00" }))
      .with_activity(mock_activity_summary(1002, "2024-05-02 07:00:00", 5000.0, 1500.0));

    let result = engine(&provider, &store, activities_only())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.activities_synced, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("no activity id"));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_partial_health_failure_records_one_error() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_health_for(&["2024-05-01"])
      .failing(FakeCall::Hrv, ProviderError::Tool("HRV not available".into()));

    let result = engine(&provider, &store, health_only())
      .run("athlete-1", SyncWindow::new(date("2024-05-01"), date("2024-05-01")))
      .await
      .unwrap();
    assert_eq!(result.health_days_synced, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("hrv"));
    assert!(!result.aborted);

    let stored = store
      .find_daily_health("athlete-1", date("2024-05-01"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.steps, Some(11234));
    assert_eq!(stored.sleep_total_minutes, Some(450));
    assert_eq!(stored.sleep_score, Some(84));
    assert_eq!(stored.hrv_last_night, None);

    let metadata = stored.metadata();
    assert!(metadata.contains_key("daily"));
    assert!(metadata.contains_key("sleep"));
    assert!(!metadata.contains_key("hrv"));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_hrv_failure_on_one_date_leaves_other_dates_intact() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_health_for(&["2024-05-01", "2024-05-02", "2024-05-03"])
      .failing_on(FakeCall::Hrv, "2024-05-02", ProviderError::Timeout("tools/call".into()));

    let result = engine(&provider, &store, health_only())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.health_days_synced, 3);
    assert_eq!(result.errors.len(), 1, "unexpected errors: {:?}", result.errors);
    assert!(result.errors[0].starts_with("2024-05-02 hrv"));
    assert!(!result.aborted);

    for raw in ["2024-05-01", "2024-05-03"] {
      let stored = store.find_daily_health("athlete-1", date(raw)).await.unwrap().unwrap();
      assert_eq!(stored.hrv_last_night, Some(52.0));
      assert_eq!(stored.sleep_score, Some(84));
    }
    let middle = store
      .find_daily_health("athlete-1", date("2024-05-02"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(middle.hrv_last_night, None);
    assert_eq!(middle.steps, Some(11234));
    assert_eq!(middle.sleep_total_minutes, Some(450));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_later_sync_fills_missing_health_without_clobbering() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let day = SyncWindow::new(date("2024-05-01"), date("2024-05-01"));

    let failing_hrv = FakeProvider::new()
      .with_health_for(&["2024-05-01"])
      .failing(FakeCall::Hrv, ProviderError::Tool("HRV not available".into()));
    engine(&failing_hrv, &store, health_only())
      .run("athlete-1", day)
      .await
      .unwrap();

    // Second pass: only HRV has data
    let hrv_only = FakeProvider::new().with_hrv("2024-05-01", mock_hrv("2024-05-01"));
    let result = engine(&hrv_only, &store, health_only())
      .run("athlete-1", day)
      .await
      .unwrap();
    assert_eq!(result.health_days_synced, 1);

    let stored = store
      .find_daily_health("athlete-1", date("2024-05-01"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.steps, Some(11234));
    assert_eq!(stored.hrv_last_night, Some(52.0));
    assert_eq!(stored.hrv_status.as_deref(), Some("balanced"));
    let metadata = stored.metadata();
    assert!(metadata.contains_key("daily"));
    assert!(metadata.contains_key("hrv"));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_health")
      .fetch_one(&pool)
      .await
      .unwrap();
    assert_eq!(rows, 1);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_connect_failure_returns_connection_error() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-05-01 07:00:00", 9656.06, 2880.0))
      .failing(FakeCall::Connect, ProviderError::Connection("worker not found".into()));

    let err = engine(&provider, &store, SyncConfig::default())
      .run("athlete-1", window())
      .await
      .unwrap_err();

    let SyncError::Connection { message, partial } = &err;
    assert!(message.contains("worker not found"));
    assert_eq!(partial.activities_synced, 0);
    assert!(partial.aborted);
    assert!(provider.was_shut_down());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_connection_lost_mid_run_keeps_partial_result() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-05-01 07:00:00", 9656.06, 2880.0))
      .with_health_for(&["2024-05-01", "2024-05-02", "2024-05-03"])
      .failing(FakeCall::DailySummary, ProviderError::Connection("Connection closed".into()));

    let err = engine(&provider, &store, SyncConfig::default())
      .run("athlete-1", window())
      .await
      .unwrap_err();

    let partial = err.partial();
    assert!(partial.aborted);
    assert_eq!(partial.activities_synced, 1);
    // Sleep and HRV for the first date still landed; later dates never ran
    assert_eq!(partial.health_days_synced, 1);
    assert_eq!(partial.body_composition_synced, 0);
    // Reported once, through the error itself
    assert!(partial.errors.is_empty(), "unexpected errors: {:?}", partial.errors);
    assert!(err.to_string().contains("Connection closed"));
    assert!(provider.was_shut_down());
    assert!(store
      .find_daily_health("athlete-1", date("2024-05-02"))
      .await
      .unwrap()
      .is_none());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_connection_lost_listing_activities() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_health_for(&["2024-05-01"])
      .failing(FakeCall::ListActivities, ProviderError::Connection("Connection closed".into()));

    let err = engine(&provider, &store, SyncConfig::default())
      .run("athlete-1", window())
      .await
      .unwrap_err();

    let SyncError::Connection { message, partial } = &err;
    assert!(message.contains("Connection closed"));
    assert!(partial.aborted);
    assert!(partial.errors.is_empty(), "unexpected errors: {:?}", partial.errors);
    assert_eq!(partial.health_days_synced, 0);
    assert!(!provider.calls().contains(&FakeCall::DailySummary));
    assert!(provider.was_shut_down());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_persistence_failure_does_not_stop_run() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    sqlx::query("DROP TABLE workout_laps").execute(&pool).await.unwrap();

    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-05-01 07:00:00", 9656.06, 2880.0))
      .with_activity(mock_activity_summary(1002, "2024-05-02 07:00:00", 5000.0, 1500.0))
      .with_health_for(&["2024-05-01"]);

    let result = engine(&provider, &store, SyncConfig::default())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.activities_synced, 0);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors.iter().all(|e| e.starts_with("Activity 100")));
    assert_eq!(result.health_days_synced, 1);
    assert!(!result.aborted);

    // Failed inserts roll back completely
    let workouts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workouts")
      .fetch_one(&pool)
      .await
      .unwrap();
    assert_eq!(workouts, 0);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_body_composition_synced_per_date() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new().with_body_composition(json!({
      "dateWeightList": [
        { "calendarDate": "2024-05-01", "weight": 70000.0, "bodyFat": 14.2 },
        { "calendarDate": "2024-05-03", "weight": 69800.0 }
      ]
    }));
    let config = SyncConfig {
      families: MetricFamilies {
        body_composition: true,
        ..MetricFamilies::none()
      },
      ..SyncConfig::default()
    };

    let result = engine(&provider, &store, config.clone())
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.body_composition_synced, 2);

    engine(&provider, &store, config)
      .run("athlete-1", window())
      .await
      .unwrap();
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM body_composition")
      .fetch_one(&pool)
      .await
      .unwrap();
    assert_eq!(rows, 2);

    let entry = store
      .find_body_composition("athlete-1", date("2024-05-01"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(entry.weight_lbs, Some(154.3));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_undated_weigh_in_does_not_drop_the_batch() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new().with_body_composition(json!({
      "dateWeightList": [
        { "calendarDate": "2024-05-01", "weight": 70000.0 },
        { "weight": 69900.0 },
        { "calendarDate": "2024-05-03", "weight": 69800.0 }
      ]
    }));
    let config = SyncConfig {
      families: MetricFamilies {
        body_composition: true,
        ..MetricFamilies::none()
      },
      ..SyncConfig::default()
    };

    let result = engine(&provider, &store, config)
      .run("athlete-1", window())
      .await
      .unwrap();
    assert_eq!(result.body_composition_synced, 2);
    assert_eq!(result.errors.len(), 1, "unexpected errors: {:?}", result.errors);
    assert!(result.errors[0].starts_with("Body composition"));

    for raw in ["2024-05-01", "2024-05-03"] {
      assert!(store
        .find_body_composition("athlete-1", date(raw))
        .await
        .unwrap()
        .is_some());
    }

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_cancelled_run_is_marked_aborted() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-05-01 07:00:00", 9656.06, 2880.0));

    let engine = engine(&provider, &store, SyncConfig::default());
    engine.cancel_flag().cancel();
    let result = engine.run("athlete-1", window()).await.unwrap();

    assert!(result.aborted);
    assert_eq!(result.errors, vec!["sync cancelled".to_string()]);
    assert_eq!(result.activities_synced, 0);
    assert!(provider.was_shut_down());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_runs_for_same_user_are_serialized() {
    let pool = setup_test_db().await;
    let store = SqliteStore::new(pool.clone());
    let locks = Arc::new(SyncLocks::new());
    let provider = FakeProvider::new()
      .with_activity(mock_activity_summary(1001, "2024-05-01 07:00:00", 9656.06, 2880.0));

    let a = engine(&provider, &store, activities_only()).with_locks(locks.clone());
    let b = engine(&provider, &store, activities_only()).with_locks(locks.clone());
    let (first, second) = tokio::join!(a.run("athlete-1", window()), b.run("athlete-1", window()));
    let (first, second) = (first.unwrap(), second.unwrap());

    // Exactly one run inserted; the other saw the stored activity
    assert_eq!(first.activities_synced + second.activities_synced, 1);
    assert_eq!(first.activities_skipped + second.activities_skipped, 1);
    assert!(first.errors.is_empty() && second.errors.is_empty());

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_activity_list_shapes() {
    let list = json!([{ "activityId": 1 }]);
    assert_eq!(activity_list(&list).len(), 1);
    let wrapped = json!({ "activities": [{ "activityId": 1 }, { "activityId": 2 }] });
    assert_eq!(activity_list(&wrapped).len(), 2);
    assert!(activity_list(&json!("No activities found")).is_empty());
  }

  #[test]
  fn test_stamp_date_keeps_existing_date() {
    let stamped = stamp_date(json!({ "calendarDate": "2024-05-02" }), date("2024-05-01"));
    assert_eq!(stamped["calendarDate"], "2024-05-02");
    let stamped = stamp_date(json!({ "totalSteps": 10 }), date("2024-05-01"));
    assert_eq!(stamped["calendarDate"], "2024-05-01");
  }
}
