use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::storage::StorageError;

pub type DbPool = SqlitePool;

/// Open the connection pool and run migrations
///
/// `database_url` is any sqlx SQLite URL; `?mode=rwc` creates the file on
/// first use.
pub async fn initialize_db(database_url: &str) -> Result<DbPool, StorageError> {
  info!(database_url, "Initializing database");

  // Create connection pool
  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .connect(database_url)
    .await?;

  // Run migrations
  sqlx::migrate!("./migrations").run(&pool).await?;

  info!("Database initialized successfully");

  Ok(pool)
}
