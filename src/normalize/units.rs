//! Unit conversion applied at the normalization boundary.
//!
//! Nothing past this module holds meters, seconds or grams.

const METERS_PER_MILE: f64 = 1609.344;
const FEET_PER_METER: f64 = 3.28084;
const GRAMS_PER_POUND: f64 = 453.592;

fn round_to(value: f64, places: i32) -> f64 {
  let factor = 10f64.powi(places);
  (value * factor).round() / factor
}

/// Meters to miles, two decimals
pub fn meters_to_miles(meters: f64) -> f64 {
  round_to(meters / METERS_PER_MILE, 2)
}

/// Meters to whole feet
pub fn meters_to_feet(meters: f64) -> i64 {
  (meters * FEET_PER_METER).round() as i64
}

/// Seconds to minutes, two decimals
pub fn seconds_to_minutes(seconds: f64) -> f64 {
  round_to(seconds / 60.0, 2)
}

/// Seconds to whole minutes (sleep stages)
pub fn seconds_to_whole_minutes(seconds: f64) -> i64 {
  (seconds / 60.0).round() as i64
}

/// Grams to pounds, one decimal
pub fn grams_to_pounds(grams: f64) -> f64 {
  round_to(grams / GRAMS_PER_POUND, 1)
}

/// Derive pace per mile as `M:SS`.
///
/// Never trusts an upstream pace field. Zero, negative or non-finite inputs
/// give `None` instead of dividing by zero.
pub fn pace_per_mile(duration_minutes: f64, distance_miles: f64) -> Option<String> {
  if !(distance_miles > 0.0) || !(duration_minutes > 0.0) {
    return None;
  }
  let pace_minutes = duration_minutes / distance_miles;
  if !pace_minutes.is_finite() {
    return None;
  }
  let total_seconds = (pace_minutes * 60.0).round() as i64;
  Some(format!("{}:{:02}", total_seconds / 60, total_seconds % 60))
}
