//! trainer-sync
//!
//! Runs one sync for a user over the last N days and prints the result as
//! JSON.
//!
//! Usage:
//! ```bash
//! # Last 7 days (SYNC_WINDOW_DAYS) from the garmin tool server
//! trainer-sync --user athlete-1
//!
//! # Explicit window
//! trainer-sync --user athlete-1 --days 30
//! ```

use chrono::Local;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trainer_sync_lib::config::{Config, LogFormat};
use trainer_sync_lib::provider::GARMIN_PROVIDER;
use trainer_sync_lib::sync::{CancelFlag, SyncError, SyncLocks};
use trainer_sync_lib::{db, ProviderRegistry, SqliteStore, SyncEngine, SyncWindow};

#[derive(Parser)]
#[command(
  name = "trainer-sync",
  about = "Sync wearable activities and health metrics into the training log"
)]
struct Args {
  /// User whose plan and health log receive the data
  #[arg(long)]
  user: String,

  /// Days back from today, today included (overrides SYNC_WINDOW_DAYS)
  #[arg(long)]
  days: Option<i64>,

  /// Provider to pull from
  #[arg(long, default_value = GARMIN_PROVIDER)]
  provider: String,
}

#[tokio::main]
async fn main() -> ExitCode {
  let args = Args::parse();

  let config = match Config::from_env() {
    Ok(config) => config,
    Err(e) => {
      eprintln!("Configuration error: {}", e);
      return ExitCode::from(2);
    }
  };
  init_logging(config.log_format);

  let pool = match db::initialize_db(&config.database_url).await {
    Ok(pool) => pool,
    Err(e) => {
      error!(error = %e, "Failed to initialize database");
      return ExitCode::from(2);
    }
  };

  let registry = ProviderRegistry::with_defaults();
  let provider = match registry.create(&args.provider, &config) {
    Ok(provider) => provider,
    Err(e) => {
      error!(
        provider = %args.provider,
        supported = ?registry.supported_providers(),
        error = %e,
        "Failed to create provider"
      );
      return ExitCode::from(2);
    }
  };

  let days = args.days.unwrap_or(config.sync.window_days);
  let window = SyncWindow::last_days(days, Local::now().date_naive());

  let cancel = CancelFlag::new();
  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, stopping after the current item");
        cancel.cancel();
      }
    }
  });

  let engine = SyncEngine::new(provider, Arc::new(SqliteStore::new(pool.clone())), config.sync.clone())
    .with_locks(Arc::new(SyncLocks::new()))
    .with_cancel_flag(cancel);

  let (result, code) = match engine.run(&args.user, window).await {
    Ok(result) => (result, ExitCode::SUCCESS),
    Err(e @ SyncError::Connection { .. }) => {
      error!(user_id = %args.user, error = %e, "Sync aborted");
      (e.partial().clone(), ExitCode::FAILURE)
    }
  };

  match serde_json::to_string_pretty(&result) {
    Ok(json) => println!("{}", json),
    Err(e) => error!(error = %e, "Failed to encode sync result"),
  }

  pool.close().await;
  info!(user_id = %args.user, "Done");
  code
}

/// Initialize logging. `RUST_LOG` filters (default `info`); `LOG_FORMAT=json`
/// switches to structured JSON lines.
fn init_logging(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let registry = tracing_subscriber::registry().with(filter);

  // Logs go to stderr; stdout carries the JSON result
  match format {
    LogFormat::Json => registry
      .with(
        tracing_subscriber::fmt::layer()
          .json()
          .with_target(false)
          .with_current_span(true)
          .flatten_event(true)
          .with_writer(std::io::stderr),
      )
      .init(),
    LogFormat::Pretty => registry
      .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
      .init(),
  }
}
