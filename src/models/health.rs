use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Daily wellness summary (steps, calories, stress, body battery, SpO2)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDailyHealth {
  pub date: NaiveDate,
  pub steps: Option<i64>,
  pub total_calories: Option<i64>,
  pub active_calories: Option<i64>,
  pub resting_heartrate: Option<i64>,
  pub average_stress: Option<i64>,
  pub body_battery_high: Option<i64>,
  pub body_battery_low: Option<i64>,
  pub average_spo2: Option<f64>,
}

/// Sleep stages for the night ending on `date`, in minutes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
  pub date: NaiveDate,
  pub total_minutes: Option<i64>,
  pub deep_minutes: Option<i64>,
  pub light_minutes: Option<i64>,
  pub rem_minutes: Option<i64>,
  pub awake_minutes: Option<i64>,
  pub sleep_score: Option<i64>,
}

/// Overnight heart-rate variability, milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HrvRecord {
  pub date: NaiveDate,
  pub last_night_average: Option<f64>,
  pub weekly_average: Option<f64>,
  pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyComposition {
  pub date: NaiveDate,
  pub weight_lbs: Option<f64>,
  pub bmi: Option<f64>,
  pub body_fat_pct: Option<f64>,
  pub muscle_mass_lbs: Option<f64>,
  pub bone_mass_lbs: Option<f64>,
  pub body_water_pct: Option<f64>,
}

/// Stored daily health row, keyed by (user_id, date)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyHealthRecord {
  pub id: i64,
  pub user_id: String,
  pub date: NaiveDate,
  pub steps: Option<i64>,
  pub total_calories: Option<i64>,
  pub active_calories: Option<i64>,
  pub resting_heartrate: Option<i64>,
  pub average_stress: Option<i64>,
  pub body_battery_high: Option<i64>,
  pub body_battery_low: Option<i64>,
  pub average_spo2: Option<f64>,
  pub sleep_total_minutes: Option<i64>,
  pub sleep_deep_minutes: Option<i64>,
  pub sleep_light_minutes: Option<i64>,
  pub sleep_rem_minutes: Option<i64>,
  pub sleep_awake_minutes: Option<i64>,
  pub sleep_score: Option<i64>,
  pub hrv_last_night: Option<f64>,
  pub hrv_weekly_average: Option<f64>,
  pub hrv_status: Option<String>,
  pub metadata_json: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
}

impl DailyHealthRecord {
  pub fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
    self
      .metadata_json
      .as_deref()
      .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
      .and_then(|v| match v {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
      })
      .unwrap_or_default()
  }
}

/// Fields gathered for one (user, date) during a sync.
///
/// `None` means "this sync learned nothing about the field" and must leave any
/// stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyHealthUpdate {
  pub steps: Option<i64>,
  pub total_calories: Option<i64>,
  pub active_calories: Option<i64>,
  pub resting_heartrate: Option<i64>,
  pub average_stress: Option<i64>,
  pub body_battery_high: Option<i64>,
  pub body_battery_low: Option<i64>,
  pub average_spo2: Option<f64>,
  pub sleep_total_minutes: Option<i64>,
  pub sleep_deep_minutes: Option<i64>,
  pub sleep_light_minutes: Option<i64>,
  pub sleep_rem_minutes: Option<i64>,
  pub sleep_awake_minutes: Option<i64>,
  pub sleep_score: Option<i64>,
  pub hrv_last_night: Option<f64>,
  pub hrv_weekly_average: Option<f64>,
  pub hrv_status: Option<String>,
  /// Per-source blobs, merged key-by-key into the stored metadata
  pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl DailyHealthUpdate {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  pub fn apply_daily(&mut self, daily: &CanonicalDailyHealth) {
    self.steps = daily.steps;
    self.total_calories = daily.total_calories;
    self.active_calories = daily.active_calories;
    self.resting_heartrate = daily.resting_heartrate;
    self.average_stress = daily.average_stress;
    self.body_battery_high = daily.body_battery_high;
    self.body_battery_low = daily.body_battery_low;
    self.average_spo2 = daily.average_spo2;
    self.record_source("daily", daily);
  }

  pub fn apply_sleep(&mut self, sleep: &SleepRecord) {
    self.sleep_total_minutes = sleep.total_minutes;
    self.sleep_deep_minutes = sleep.deep_minutes;
    self.sleep_light_minutes = sleep.light_minutes;
    self.sleep_rem_minutes = sleep.rem_minutes;
    self.sleep_awake_minutes = sleep.awake_minutes;
    self.sleep_score = sleep.sleep_score;
    self.record_source("sleep", sleep);
  }

  pub fn apply_hrv(&mut self, hrv: &HrvRecord) {
    self.hrv_last_night = hrv.last_night_average;
    self.hrv_weekly_average = hrv.weekly_average;
    self.hrv_status = hrv.status.clone();
    self.record_source("hrv", hrv);
  }

  fn record_source<T: Serialize>(&mut self, source: &str, value: &T) {
    if let Ok(v) = serde_json::to_value(value) {
      self.metadata.insert(source.to_string(), v);
    }
  }
}
