use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one sync run. Always returned, even for partial runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
  /// Activities written (inserted or matched to a plan entry)
  pub activities_synced: usize,
  /// Subset of `activities_synced` that upgraded a planned workout
  pub planned_matched: usize,
  /// Activities already stored from an earlier sync
  pub activities_skipped: usize,
  pub health_days_synced: usize,
  pub body_composition_synced: usize,
  pub errors: Vec<String>,
  /// Set when the run stopped before covering the whole window
  pub aborted: bool,
  pub completed_at: Option<DateTime<Utc>>,
}

impl SyncResult {
  pub fn record_error(&mut self, error: impl Into<String>) {
    self.errors.push(error.into());
  }

  pub fn finish(mut self) -> Self {
    self.completed_at = Some(Utc::now());
    self
  }
}
