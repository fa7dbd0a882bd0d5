//! Daily health normalization: wellness summary, sleep, HRV, body composition.
//!
//! Every entity accepts a flat shape and a nested one (metrics under a
//! wrapper object such as `dailySleepDTO` or `hrvSummary`). A `null` or empty
//! payload means the provider had nothing for that day and maps to `None`.

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde_json::Value;

use super::fields::{self, lenient_f64, lenient_string, FieldCandidates};
use super::units::{grams_to_pounds, seconds_to_whole_minutes};
use super::NormalizeError;
use crate::models::{BodyComposition, CanonicalDailyHealth, HrvRecord, SleepRecord};

const DATE_FIELDS: FieldCandidates = &["calendarDate", "date", "day"];
const HRV_SAMPLE_COLLECTIONS: FieldCandidates = &["hrvReadings", "readings", "samples"];
const HRV_SAMPLE_VALUE: FieldCandidates = &["hrvValue", "value", "hrv"];

/// Read a `YYYY-MM-DD` date (timestamps are cut to their date part).
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
  let raw = raw.trim();
  let day = raw.get(..10).unwrap_or(raw);
  NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn date_from(obj: &Value) -> Option<NaiveDate> {
  DATE_FIELDS
    .iter()
    .filter_map(|key| obj.get(*key))
    .find_map(|v| match v {
      Value::String(s) => parse_calendar_date(s),
      // Epoch milliseconds
      Value::Number(n) => n
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.date_naive()),
      _ => None,
    })
}

fn round_i64(value: Option<f64>) -> Option<i64> {
  value.map(|v| v.round() as i64)
}

/// ---------------------------------------------------------------------------
/// Daily summary
/// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DailySummaryPayload {
  #[serde(deserialize_with = "lenient_f64")]
  total_steps: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  total_kilocalories: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  active_kilocalories: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  resting_heart_rate: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  average_stress_level: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  body_battery_highest_value: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  body_battery_lowest_value: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  average_spo2: Option<f64>,
}

/// Nested shape: `{"calendarDate": .., "summary": {..same fields..}}`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DailyDetailPayload {
  summary: DailySummaryPayload,
}

pub fn normalize_daily_summary(
  payload: &Value,
) -> Result<Option<CanonicalDailyHealth>, NormalizeError> {
  if fields::is_empty_payload(payload) {
    return Ok(None);
  }
  let nested = payload.get("summary").filter(|v| v.is_object());
  let date = date_from(payload)
    .or_else(|| nested.and_then(date_from))
    .ok_or(NormalizeError::MissingDate)?;

  let p = match nested {
    Some(_) => serde_json::from_value::<DailyDetailPayload>(payload.clone())
      .map(|d| d.summary)
      .unwrap_or_default(),
    None => serde_json::from_value::<DailySummaryPayload>(payload.clone()).unwrap_or_default(),
  };

  Ok(Some(CanonicalDailyHealth {
    date,
    steps: round_i64(p.total_steps),
    total_calories: round_i64(p.total_kilocalories),
    active_calories: round_i64(p.active_kilocalories),
    resting_heartrate: round_i64(p.resting_heart_rate),
    average_stress: round_i64(p.average_stress_level),
    body_battery_high: round_i64(p.body_battery_highest_value),
    body_battery_low: round_i64(p.body_battery_lowest_value),
    average_spo2: p.average_spo2,
  }))
}

/// ---------------------------------------------------------------------------
/// Sleep
/// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SleepSummaryPayload {
  #[serde(deserialize_with = "lenient_f64")]
  sleep_time_seconds: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  deep_sleep_seconds: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  light_sleep_seconds: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  rem_sleep_seconds: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  awake_sleep_seconds: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  sleep_score: Option<f64>,
}

/// Nested shape: stages under `dailySleepDTO`, score under
/// `dailySleepDTO.sleepScores.overall.value`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SleepDetailPayload {
  #[serde(rename = "dailySleepDTO")]
  daily_sleep: SleepSummaryPayload,
}

pub fn normalize_sleep(payload: &Value) -> Result<Option<SleepRecord>, NormalizeError> {
  if fields::is_empty_payload(payload) {
    return Ok(None);
  }
  let nested = payload.get("dailySleepDTO").filter(|v| v.is_object());
  let date = nested
    .and_then(date_from)
    .or_else(|| date_from(payload))
    .ok_or(NormalizeError::MissingDate)?;

  let (p, score) = match nested {
    Some(inner) => {
      let p = serde_json::from_value::<SleepDetailPayload>(payload.clone())
        .map(|d| d.daily_sleep)
        .unwrap_or_default();
      let score = inner
        .pointer("/sleepScores/overall/value")
        .and_then(fields::as_number)
        .or(p.sleep_score);
      (p, score)
    }
    None => {
      let p = serde_json::from_value::<SleepSummaryPayload>(payload.clone()).unwrap_or_default();
      let score = p
        .sleep_score
        .or_else(|| fields::first_number(payload, &["overallSleepScore", "score"]));
      (p, score)
    }
  };

  Ok(Some(SleepRecord {
    date,
    total_minutes: p.sleep_time_seconds.map(seconds_to_whole_minutes),
    deep_minutes: p.deep_sleep_seconds.map(seconds_to_whole_minutes),
    light_minutes: p.light_sleep_seconds.map(seconds_to_whole_minutes),
    rem_minutes: p.rem_sleep_seconds.map(seconds_to_whole_minutes),
    awake_minutes: p.awake_sleep_seconds.map(seconds_to_whole_minutes),
    sleep_score: round_i64(score),
  }))
}

/// ---------------------------------------------------------------------------
/// HRV
/// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HrvSummaryPayload {
  #[serde(deserialize_with = "lenient_f64")]
  last_night_avg: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  weekly_avg: Option<f64>,
  #[serde(deserialize_with = "lenient_string")]
  status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HrvDetailPayload {
  hrv_summary: HrvSummaryPayload,
}

pub fn normalize_hrv(payload: &Value) -> Result<Option<HrvRecord>, NormalizeError> {
  if fields::is_empty_payload(payload) {
    return Ok(None);
  }
  let nested = payload.get("hrvSummary").filter(|v| v.is_object());
  let date = nested
    .and_then(date_from)
    .or_else(|| date_from(payload))
    .ok_or(NormalizeError::MissingDate)?;

  let p = match nested {
    Some(_) => serde_json::from_value::<HrvDetailPayload>(payload.clone())
      .map(|d| d.hrv_summary)
      .unwrap_or_default(),
    None => serde_json::from_value::<HrvSummaryPayload>(payload.clone()).unwrap_or_default(),
  };

  let last_night_average = p.last_night_avg.or_else(|| mean_of_samples(payload));

  Ok(Some(HrvRecord {
    date,
    last_night_average,
    weekly_average: p.weekly_avg,
    status: p.status.map(|s| s.to_lowercase()),
  }))
}

/// Mean of timestamped HRV samples.
///
/// Samples arrive either as a map `{"<timestamp>": value}` or as a list of
/// reading objects (`[{"hrvValue": 41, "readingTimeLocal": ..}]`).
fn mean_of_samples(payload: &Value) -> Option<f64> {
  let samples: Vec<f64> = match fields::first_present(payload, HRV_SAMPLE_COLLECTIONS)? {
    Value::Object(map) => map.values().filter_map(fields::as_number).collect(),
    Value::Array(items) => items
      .iter()
      .filter_map(|item| match item {
        Value::Object(_) => fields::first_number(item, HRV_SAMPLE_VALUE),
        other => fields::as_number(other),
      })
      .collect(),
    _ => return None,
  };

  if samples.is_empty() {
    return None;
  }
  Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// ---------------------------------------------------------------------------
/// Body composition
/// ---------------------------------------------------------------------------

/// One weigh-in; masses in grams
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WeighInPayload {
  #[serde(deserialize_with = "lenient_f64")]
  weight: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  bmi: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  body_fat: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  muscle_mass: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  bone_mass: Option<f64>,
  #[serde(deserialize_with = "lenient_f64")]
  body_water: Option<f64>,
}

/// Normalize a body-composition payload for a date range.
///
/// The detail shape lists weigh-ins under `dateWeightList`; the flat shape is
/// a single weigh-in. Each weigh-in is read on its own, so an undated entry
/// yields one `Err` without affecting the rest. Readable entries come first,
/// sorted by date; later entries for the same date replace earlier ones.
pub fn normalize_body_composition(payload: &Value) -> Vec<Result<BodyComposition, NormalizeError>> {
  if fields::is_empty_payload(payload) {
    return Vec::new();
  }

  let entries: Vec<&Value> = match payload.get("dateWeightList") {
    Some(Value::Array(items)) => items.iter().collect(),
    Some(_) => Vec::new(),
    None => vec![payload],
  };

  let mut records: Vec<BodyComposition> = Vec::with_capacity(entries.len());
  let mut failures = Vec::new();
  for entry in entries {
    let record = match weigh_in(entry) {
      Ok(record) => record,
      Err(e) => {
        failures.push(e);
        continue;
      }
    };
    match records.iter_mut().find(|existing| existing.date == record.date) {
      Some(existing) => *existing = record,
      None => records.push(record),
    }
  }
  records.sort_by_key(|r| r.date);

  records
    .into_iter()
    .map(Ok)
    .chain(failures.into_iter().map(Err))
    .collect()
}

fn weigh_in(entry: &Value) -> Result<BodyComposition, NormalizeError> {
  let date = date_from(entry).ok_or(NormalizeError::MissingDate)?;
  let p = serde_json::from_value::<WeighInPayload>(entry.clone()).unwrap_or_default();
  Ok(BodyComposition {
    date,
    weight_lbs: p.weight.map(grams_to_pounds),
    bmi: p.bmi,
    body_fat_pct: p.body_fat,
    muscle_mass_lbs: p.muscle_mass.map(grams_to_pounds),
    bone_mass_lbs: p.bone_mass.map(grams_to_pounds),
    body_water_pct: p.body_water,
  })
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
