//! Field lookup across provider naming variants
//!
//! Providers report the same concept under different keys depending on the
//! endpoint and firmware (`duration` vs `elapsedDuration` vs
//! `movingDuration`). Each concept gets an ordered candidate list; the first
//! key present with a usable value wins.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Ordered key candidates for one concept
pub type FieldCandidates = &'static [&'static str];

pub const LAP_INDEX: FieldCandidates = &["lapIndex", "lapNumber", "splitNumber", "index"];
pub const LAP_DISTANCE: FieldCandidates = &["distance", "totalDistance", "distanceInMeters"];
pub const LAP_DURATION: FieldCandidates = &[
  "duration",
  "elapsedDuration",
  "movingDuration",
  "totalElapsedTime",
  "durationInSeconds",
];
pub const LAP_HEART_RATE: FieldCandidates =
  &["averageHR", "averageHeartRate", "avgHr", "averageHeartRateInBeatsPerMinute"];
pub const LAP_CADENCE: FieldCandidates = &[
  "averageRunCadence",
  "averageRunningCadenceInStepsPerMinute",
  "averageBikeCadence",
  "averageCadence",
];
pub const LAP_ELEVATION_GAIN: FieldCandidates = &["elevationGain", "totalAscent"];
pub const LAP_ELEVATION_LOSS: FieldCandidates = &["elevationLoss", "totalDescent"];

pub const ACTIVITY_CADENCE: FieldCandidates = &[
  "averageRunningCadenceInStepsPerMinute",
  "averageRunCadence",
  "averageBikingCadenceInRevPerMinute",
  "averageBikeCadence",
  "averageCadence",
];

pub const LAP_COLLECTIONS: FieldCandidates = &["lapDTOs", "splits", "laps", "splitSummaries"];

/// Return the first candidate key present (and not null) in `obj`.
pub fn first_present<'a>(obj: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
  candidates
    .iter()
    .filter_map(|key| obj.get(*key))
    .find(|v| !v.is_null())
}

/// First candidate that reads as a number. Numeric strings count.
pub fn first_number(obj: &Value, candidates: &[&str]) -> Option<f64> {
  candidates
    .iter()
    .filter_map(|key| obj.get(*key))
    .find_map(as_number)
}

pub fn first_number_or_zero(obj: &Value, candidates: &[&str]) -> f64 {
  first_number(obj, candidates).unwrap_or(0.0)
}

/// Interpret a JSON value as a finite number if it plausibly is one.
pub fn as_number(value: &Value) -> Option<f64> {
  let n = match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse::<f64>().ok(),
    _ => None,
  }?;
  n.is_finite().then_some(n)
}

/// Identifiers arrive as numbers or strings; both become strings.
pub fn as_identifier(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// True for `null`, `{}` and `[]`: the provider had nothing for that day.
pub fn is_empty_payload(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::Object(map) => map.is_empty(),
    Value::Array(items) => items.is_empty(),
    _ => false,
  }
}

/// ---------------------------------------------------------------------------
/// Lenient serde helpers for the typed payload structs
/// ---------------------------------------------------------------------------

/// Accepts a number, a numeric string, or anything else (read as `None`).
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<Value>::deserialize(deserializer)?;
  Ok(value.as_ref().and_then(as_number))
}

/// Accepts a string or a number; other shapes read as `None`.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<Value>::deserialize(deserializer)?;
  Ok(value.as_ref().and_then(as_identifier))
}
