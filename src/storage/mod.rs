//! Persistence contract for sync results
//!
//! The orchestrator only talks to `SyncStore`. `SqliteStore` is the sqlx
//! implementation over the schema in `migrations/`.

pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{BodyComposition, CompletedWorkout, DailyHealthRecord, DailyHealthUpdate, WorkoutRecord};

pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("Failed to encode record: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("Record not found: {0}")]
  NotFound(String),
}

impl Serialize for StorageError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

#[async_trait]
pub trait SyncStore: Send + Sync {
  /// A workout already holding this provider activity, planned or not
  async fn find_by_provider_id(
    &self,
    user_id: &str,
    provider_activity_id: &str,
  ) -> Result<Option<WorkoutRecord>, StorageError>;

  /// The planned (not yet completed) workout closest to `date`, at most
  /// `tolerance_days` away. Ties go to the earlier date.
  async fn find_planned(
    &self,
    user_id: &str,
    date: NaiveDate,
    tolerance_days: i64,
  ) -> Result<Option<WorkoutRecord>, StorageError>;

  /// Insert a standalone completed workout with its laps. Returns the new id.
  async fn insert_workout(&self, user_id: &str, workout: &CompletedWorkout) -> Result<i64, StorageError>;

  /// Mark an existing workout completed with executed metrics, replacing its
  /// laps. The row keeps its id and scheduled date.
  async fn update_workout(&self, workout_id: i64, workout: &CompletedWorkout) -> Result<(), StorageError>;

  async fn find_daily_health(
    &self,
    user_id: &str,
    date: NaiveDate,
  ) -> Result<Option<DailyHealthRecord>, StorageError>;

  async fn insert_daily_health(
    &self,
    user_id: &str,
    date: NaiveDate,
    update: &DailyHealthUpdate,
  ) -> Result<i64, StorageError>;

  /// Apply `update` to a stored row. Fields left `None` keep their stored
  /// value; metadata is merged key by key.
  async fn update_daily_health(
    &self,
    existing: &DailyHealthRecord,
    update: &DailyHealthUpdate,
  ) -> Result<(), StorageError>;

  async fn upsert_body_composition(&self, user_id: &str, entry: &BodyComposition) -> Result<(), StorageError>;
}
