//! Sync orchestration
//!
//! Pulls a bounded date window from a provider, normalizes it, reconciles
//! activities against the training plan and writes through a `SyncStore`.

pub mod lock;
pub mod orchestrator;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::models::SyncResult;

pub use lock::{CancelFlag, SyncLocks};
pub use orchestrator::SyncEngine;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// The provider could not be reached, or went away mid-run. `partial`
  /// holds whatever was written before that.
  #[error("Provider connection failed: {message}")]
  Connection { message: String, partial: SyncResult },
}

impl SyncError {
  pub fn partial(&self) -> &SyncResult {
    match self {
      Self::Connection { partial, .. } => partial,
    }
  }
}

impl Serialize for SyncError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// Inclusive range of calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncWindow {
  pub start: NaiveDate,
  pub end: NaiveDate,
}

impl SyncWindow {
  pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
    if start <= end {
      Self { start, end }
    } else {
      Self { start: end, end: start }
    }
  }

  /// The `days` days ending on `today`, today included
  pub fn last_days(days: i64, today: NaiveDate) -> Self {
    let days = days.max(1);
    Self::new(today - Duration::days(days - 1), today)
  }

  pub fn contains(&self, date: NaiveDate) -> bool {
    self.start <= date && date <= self.end
  }

  /// Every date in the window, ascending
  pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
    let end = self.end;
    self.start.iter_days().take_while(move |d| *d <= end)
  }
}
