//! Response normalizer
//!
//! Pure mapping from provider payloads to canonical entities. Shape variance
//! is absorbed here; the only failure is a payload without its identifier.

pub mod activity;
pub mod fields;
pub mod health;
pub mod units;

use serde::Serialize;

pub use activity::{normalize_activity, normalize_laps};
pub use health::{normalize_body_composition, normalize_daily_summary, normalize_hrv, normalize_sleep};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
  #[error("Payload has no activity id")]
  MissingId,

  #[error("Payload has no calendar date")]
  MissingDate,
}

impl Serialize for NormalizeError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}
