use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Serializes sync runs per user. Runs for different users never wait on
/// each other.
#[derive(Debug, Default)]
pub struct SyncLocks {
  locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SyncLocks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wait for the user's lock. Held until the guard drops.
  pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
    // Clone the Arc out so the map shard is not held across the await
    let lock = self
      .locks
      .entry(user_id.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone();

    if let Ok(guard) = lock.clone().try_lock_owned() {
      return guard;
    }
    debug!(user_id, "Sync already running for user, waiting");
    lock.lock_owned().await
  }

  pub fn is_locked(&self, user_id: &str) -> bool {
    self
      .locks
      .get(user_id)
      .map(|lock| lock.try_lock().is_err())
      .unwrap_or(false)
  }
}

/// Cooperative cancellation for a running sync. Checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}
