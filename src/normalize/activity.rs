//! Activity and lap normalization
//!
//! Activities come in two shapes: the flat summary returned by list calls,
//! and the detail shape with metrics nested under `summaryDTO`. Each shape has
//! its own parse target and mapping function.

use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;

use super::fields::{self, lenient_f64, lenient_string};
use super::units::{meters_to_feet, meters_to_miles, pace_per_mile, seconds_to_minutes};
use super::NormalizeError;
use crate::models::{CanonicalActivity, CanonicalLap};

const DETAIL_DISCRIMINATOR: &str = "summaryDTO";

/// ---------------------------------------------------------------------------
/// Parse targets
/// ---------------------------------------------------------------------------

/// Flat shape, as returned by the activity list
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActivitySummaryPayload {
  #[serde(rename = "activityId", deserialize_with = "lenient_string")]
  activity_id: Option<String>,
  #[serde(rename = "activityName", deserialize_with = "lenient_string")]
  activity_name: Option<String>,
  /// Either `{"typeKey": "running"}` or a bare string
  #[serde(rename = "activityType")]
  activity_type: Option<Value>,
  #[serde(rename = "startTimeLocal", deserialize_with = "lenient_string")]
  start_time_local: Option<String>,
  #[serde(rename = "startTimeGMT", deserialize_with = "lenient_string")]
  start_time_gmt: Option<String>,
  #[serde(deserialize_with = "lenient_f64")]
  duration: Option<f64>,
  #[serde(rename = "movingDuration", deserialize_with = "lenient_f64")]
  moving_duration: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  distance: Option<f64>,
  #[serde(rename = "elevationGain", deserialize_with = "lenient_f64")]
  elevation_gain: Option<f64>,
  #[serde(rename = "averageHR", deserialize_with = "lenient_f64")]
  average_hr: Option<f64>,
  #[serde(rename = "maxHR", deserialize_with = "lenient_f64")]
  max_hr: Option<f64>,
  #[serde(rename = "avgPower", deserialize_with = "lenient_f64")]
  average_power: Option<f64>,
  #[serde(rename = "activityTrainingLoad", deserialize_with = "lenient_f64")]
  training_load: Option<f64>,
  #[serde(rename = "aerobicTrainingEffect", deserialize_with = "lenient_f64")]
  aerobic_training_effect: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  calories: Option<f64>,
}

/// Detail shape: identity at the top, metrics under `summaryDTO`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActivityDetailPayload {
  #[serde(rename = "activityId", deserialize_with = "lenient_string")]
  activity_id: Option<String>,
  #[serde(rename = "activityName", deserialize_with = "lenient_string")]
  activity_name: Option<String>,
  #[serde(rename = "activityTypeDTO")]
  activity_type: Option<Value>,
  #[serde(rename = "summaryDTO")]
  summary: DetailSummary,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailSummary {
  #[serde(rename = "startTimeLocal", deserialize_with = "lenient_string")]
  start_time_local: Option<String>,
  #[serde(rename = "startTimeGMT", deserialize_with = "lenient_string")]
  start_time_gmt: Option<String>,
  #[serde(deserialize_with = "lenient_f64")]
  duration: Option<f64>,
  #[serde(rename = "movingDuration", deserialize_with = "lenient_f64")]
  moving_duration: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  distance: Option<f64>,
  #[serde(rename = "elevationGain", deserialize_with = "lenient_f64")]
  elevation_gain: Option<f64>,
  #[serde(rename = "averageHR", deserialize_with = "lenient_f64")]
  average_hr: Option<f64>,
  #[serde(rename = "maxHR", deserialize_with = "lenient_f64")]
  max_hr: Option<f64>,
  #[serde(rename = "averagePower", deserialize_with = "lenient_f64")]
  average_power: Option<f64>,
  #[serde(rename = "activityTrainingLoad", deserialize_with = "lenient_f64")]
  training_load: Option<f64>,
  #[serde(rename = "trainingEffect", deserialize_with = "lenient_f64")]
  aerobic_training_effect: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  calories: Option<f64>,
}

/// ---------------------------------------------------------------------------
/// Activity mapping
/// ---------------------------------------------------------------------------

/// Normalize one activity payload, summary or detail shape.
pub fn normalize_activity(payload: &Value) -> Result<CanonicalActivity, NormalizeError> {
  // Derived deserializers also read sequences; only an object is an activity
  if !payload.is_object() {
    return Err(NormalizeError::MissingId);
  }
  if payload.get(DETAIL_DISCRIMINATOR).is_some_and(Value::is_object) {
    let detail: ActivityDetailPayload =
      serde_json::from_value(payload.clone()).map_err(|_| NormalizeError::MissingId)?;
    from_detail(detail, payload)
  } else {
    let summary: ActivitySummaryPayload =
      serde_json::from_value(payload.clone()).map_err(|_| NormalizeError::MissingId)?;
    from_summary(summary, payload)
  }
}

fn from_summary(
  p: ActivitySummaryPayload,
  raw: &Value,
) -> Result<CanonicalActivity, NormalizeError> {
  let id = p.activity_id.ok_or(NormalizeError::MissingId)?;
  let start_time = p
    .start_time_local
    .as_deref()
    .or(p.start_time_gmt.as_deref())
    .and_then(parse_start_time);

  Ok(build_activity(ActivityMetrics {
    id,
    name: p.activity_name,
    activity_type: p.activity_type.as_ref().and_then(type_key),
    start_time,
    duration_seconds: p.duration.or(p.moving_duration),
    distance_meters: p.distance,
    elevation_gain_meters: p.elevation_gain,
    average_hr: p.average_hr,
    max_hr: p.max_hr,
    average_cadence: fields::first_number(raw, fields::ACTIVITY_CADENCE),
    average_power: p.average_power,
    training_load: p.training_load,
    aerobic_training_effect: p.aerobic_training_effect,
    calories: p.calories,
    raw: raw.clone(),
  }))
}

fn from_detail(
  p: ActivityDetailPayload,
  raw: &Value,
) -> Result<CanonicalActivity, NormalizeError> {
  let id = p.activity_id.ok_or(NormalizeError::MissingId)?;
  let cadence = raw
    .get(DETAIL_DISCRIMINATOR)
    .and_then(|summary| fields::first_number(summary, fields::ACTIVITY_CADENCE));
  let s = p.summary;
  let start_time = s
    .start_time_local
    .as_deref()
    .or(s.start_time_gmt.as_deref())
    .and_then(parse_start_time);

  Ok(build_activity(ActivityMetrics {
    id,
    name: p.activity_name,
    activity_type: p.activity_type.as_ref().and_then(type_key),
    start_time,
    duration_seconds: s.duration.or(s.moving_duration),
    distance_meters: s.distance,
    elevation_gain_meters: s.elevation_gain,
    average_hr: s.average_hr,
    max_hr: s.max_hr,
    average_cadence: cadence,
    average_power: s.average_power,
    training_load: s.training_load,
    aerobic_training_effect: s.aerobic_training_effect,
    calories: s.calories,
    raw: raw.clone(),
  }))
}

/// Provider-native values shared by both shapes, before conversion
struct ActivityMetrics {
  id: String,
  name: Option<String>,
  activity_type: Option<String>,
  start_time: Option<NaiveDateTime>,
  duration_seconds: Option<f64>,
  distance_meters: Option<f64>,
  elevation_gain_meters: Option<f64>,
  average_hr: Option<f64>,
  max_hr: Option<f64>,
  average_cadence: Option<f64>,
  average_power: Option<f64>,
  training_load: Option<f64>,
  aerobic_training_effect: Option<f64>,
  calories: Option<f64>,
  raw: Value,
}

fn build_activity(m: ActivityMetrics) -> CanonicalActivity {
  let duration_minutes = m.duration_seconds.map(seconds_to_minutes);
  let distance_miles = m.distance_meters.map(meters_to_miles);
  let pace = match (duration_minutes, distance_miles) {
    (Some(minutes), Some(miles)) => pace_per_mile(minutes, miles),
    _ => None,
  };
  let activity_type = m.activity_type.unwrap_or_else(|| "other".to_string());

  CanonicalActivity {
    name: m.name.unwrap_or_else(|| activity_type.clone()),
    provider_activity_id: m.id,
    activity_type,
    start_time: m.start_time,
    duration_minutes,
    distance_miles,
    pace,
    average_heartrate: m.average_hr.map(|v| v.round() as i64),
    max_heartrate: m.max_hr.map(|v| v.round() as i64),
    average_cadence: m.average_cadence.map(|v| v.round() as i64),
    average_watts: m.average_power,
    elevation_gain_feet: m.elevation_gain_meters.map(meters_to_feet),
    training_load: m.training_load,
    aerobic_training_effect: m.aerobic_training_effect,
    calories: m.calories.map(|v| v.round() as i64),
    raw: m.raw,
  }
}

fn type_key(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.is_empty() => Some(s.to_lowercase()),
    Value::Object(_) => value
      .get("typeKey")
      .and_then(Value::as_str)
      .map(str::to_lowercase),
    _ => None,
  }
}

/// Parse the provider's start timestamp into local wall-clock time.
///
/// Accepts `2024-05-01 07:15:00`, `2024-05-01T07:15:00(.fff)` and RFC 3339.
/// Offsets are dropped: the local reading is what ties a run to a plan date.
pub fn parse_start_time(raw: &str) -> Option<NaiveDateTime> {
  let raw = raw.trim();
  const FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
  FORMATS
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
}

/// ---------------------------------------------------------------------------
/// Laps / splits
/// ---------------------------------------------------------------------------

/// Normalize the splits payload into laps. Never fails; unknown shapes give
/// an empty list and missing fields read as zero.
pub fn normalize_laps(payload: &Value) -> Vec<CanonicalLap> {
  let items = match payload {
    Value::Array(items) => items.as_slice(),
    Value::Object(_) => fields::first_present(payload, fields::LAP_COLLECTIONS)
      .and_then(Value::as_array)
      .map(Vec::as_slice)
      .unwrap_or_default(),
    _ => &[],
  };

  items
    .iter()
    .enumerate()
    .map(|(position, lap)| normalize_lap(lap, position as i64 + 1))
    .collect()
}

fn normalize_lap(lap: &Value, position: i64) -> CanonicalLap {
  let distance_miles = meters_to_miles(fields::first_number_or_zero(lap, fields::LAP_DISTANCE));
  let duration_minutes =
    seconds_to_minutes(fields::first_number_or_zero(lap, fields::LAP_DURATION));
  let gain = fields::first_number_or_zero(lap, fields::LAP_ELEVATION_GAIN);
  let loss = fields::first_number_or_zero(lap, fields::LAP_ELEVATION_LOSS);

  CanonicalLap {
    lap_number: fields::first_number(lap, fields::LAP_INDEX)
      .map(|n| n as i64)
      .unwrap_or(position),
    distance_miles,
    duration_minutes,
    pace: pace_per_mile(duration_minutes, distance_miles),
    average_heartrate: fields::first_number_or_zero(lap, fields::LAP_HEART_RATE).round() as i64,
    average_cadence: fields::first_number_or_zero(lap, fields::LAP_CADENCE).round() as i64,
    elevation_change_feet: meters_to_feet(gain - loss),
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
