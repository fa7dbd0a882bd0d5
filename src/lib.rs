//! Wearable telemetry sync
//!
//! Pulls activities and daily health metrics from a provider tool server over
//! JSON-RPC, normalizes them, reconciles activities with the training plan
//! and writes idempotent updates to SQLite.

pub mod config;
pub mod db;
pub mod mcp;
pub mod models;
pub mod normalize;
pub mod provider;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub mod test_utils;

pub use config::{Config, SyncConfig};
pub use provider::{DataProvider, ProviderRegistry};
pub use storage::{SqliteStore, SyncStore};
pub use sync::{SyncEngine, SyncWindow};
