use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::activity::{CanonicalActivity, CanonicalLap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkoutStatus {
  Planned,
  Completed,
  Skipped,
}

impl std::fmt::Display for WorkoutStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Planned => write!(f, "planned"),
      Self::Completed => write!(f, "completed"),
      Self::Skipped => write!(f, "skipped"),
    }
  }
}

impl std::str::FromStr for WorkoutStatus {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "planned" => Ok(Self::Planned),
      "completed" => Ok(Self::Completed),
      "skipped" => Ok(Self::Skipped),
      _ => Err(format!("Unknown workout status: {}", s)),
    }
  }
}

/// A row of the workouts table: either a training-plan placeholder or an
/// executed session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkoutRecord {
  pub id: i64,
  pub user_id: String,
  pub status: String,
  pub scheduled_date: NaiveDate,
  pub name: Option<String>,
  pub activity_type: Option<String>,
  pub provider_activity_id: Option<String>,
  pub started_at: Option<NaiveDateTime>,
  pub duration_minutes: Option<f64>,
  pub distance_miles: Option<f64>,
  pub pace: Option<String>,
  pub average_heartrate: Option<i64>,
  pub max_heartrate: Option<i64>,
  pub average_cadence: Option<i64>,
  pub average_watts: Option<f64>,
  pub elevation_gain_feet: Option<i64>,
  pub training_load: Option<f64>,
  pub aerobic_training_effect: Option<f64>,
  pub calories: Option<i64>,
  pub raw_json: Option<String>,
  pub completed_at: Option<DateTime<Utc>>,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
}

impl WorkoutRecord {
  pub fn status(&self) -> Option<WorkoutStatus> {
    self.status.parse().ok()
  }
}

/// Executed metrics written onto a workout row, either a fresh insert or an
/// in-place upgrade of a planned entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedWorkout {
  pub provider_activity_id: String,
  pub name: String,
  pub activity_type: String,
  pub scheduled_date: NaiveDate,
  pub started_at: Option<NaiveDateTime>,
  pub duration_minutes: Option<f64>,
  pub distance_miles: Option<f64>,
  pub pace: Option<String>,
  pub average_heartrate: Option<i64>,
  pub max_heartrate: Option<i64>,
  pub average_cadence: Option<i64>,
  pub average_watts: Option<f64>,
  pub elevation_gain_feet: Option<i64>,
  pub training_load: Option<f64>,
  pub aerobic_training_effect: Option<f64>,
  pub calories: Option<i64>,
  pub raw_json: String,
  pub laps: Vec<CanonicalLap>,
}

impl CompletedWorkout {
  pub fn from_activity(
    activity: CanonicalActivity,
    scheduled_date: NaiveDate,
    laps: Vec<CanonicalLap>,
  ) -> Self {
    let raw_json = serde_json::to_string(&activity.raw).unwrap_or_default();
    Self {
      provider_activity_id: activity.provider_activity_id,
      name: activity.name,
      activity_type: activity.activity_type,
      scheduled_date,
      started_at: activity.start_time,
      duration_minutes: activity.duration_minutes,
      distance_miles: activity.distance_miles,
      pace: activity.pace,
      average_heartrate: activity.average_heartrate,
      max_heartrate: activity.max_heartrate,
      average_cadence: activity.average_cadence,
      average_watts: activity.average_watts,
      elevation_gain_feet: activity.elevation_gain_feet,
      training_load: activity.training_load,
      aerobic_training_effect: activity.aerobic_training_effect,
      calories: activity.calories,
      raw_json,
      laps,
    }
  }
}
