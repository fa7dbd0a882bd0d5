use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A provider activity after normalization.
///
/// Distances are miles, durations minutes, elevation feet. The untouched
/// provider payload rides along in `raw` for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalActivity {
  pub provider_activity_id: String,
  pub name: String,
  pub activity_type: String,
  /// Local wall-clock start, as reported by the device
  pub start_time: Option<NaiveDateTime>,
  pub duration_minutes: Option<f64>,
  pub distance_miles: Option<f64>,
  /// Derived `M:SS` per mile, `None` when distance is zero or unknown
  pub pace: Option<String>,
  pub average_heartrate: Option<i64>,
  pub max_heartrate: Option<i64>,
  pub average_cadence: Option<i64>,
  pub average_watts: Option<f64>,
  pub elevation_gain_feet: Option<i64>,
  pub training_load: Option<f64>,
  pub aerobic_training_effect: Option<f64>,
  pub calories: Option<i64>,
  pub raw: serde_json::Value,
}

impl CanonicalActivity {
  /// Calendar date the activity started on (device local time)
  pub fn local_date(&self) -> Option<NaiveDate> {
    self.start_time.map(|t| t.date())
  }
}

/// One lap or split of an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLap {
  pub lap_number: i64,
  pub distance_miles: f64,
  pub duration_minutes: f64,
  pub pace: Option<String>,
  pub average_heartrate: i64,
  pub average_cadence: i64,
  pub elevation_change_feet: i64,
}
