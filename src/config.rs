//! Runtime configuration loaded from the environment (and `.env` if present)

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://trainer-sync.db?mode=rwc";
pub const DEFAULT_WINDOW_DAYS: i64 = 7;
pub const DEFAULT_ACTIVITY_LIMIT: u32 = 50;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Missing required environment variable: {0}")]
  Missing(&'static str),

  #[error("Invalid value for {name}: {value}")]
  Invalid { name: &'static str, value: String },
}

impl serde::Serialize for ConfigError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Worker Command
/// ---------------------------------------------------------------------------

/// How to launch the provider's tool-server process.
///
/// The worker inherits this process's environment, so provider credentials
/// set there reach it without passing through this crate. `env` adds or
/// overrides individual variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
  pub program: String,
  pub args: Vec<String>,
  pub env: HashMap<String, String>,
}

impl WorkerCommand {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: HashMap::new(),
    }
  }

  pub fn with_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args = args.into_iter().map(Into::into).collect();
    self
  }
}

/// ---------------------------------------------------------------------------
/// Metric Families
/// ---------------------------------------------------------------------------

/// Which kinds of data a sync pulls. Everything is on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricFamilies {
  pub activities: bool,
  pub daily: bool,
  pub sleep: bool,
  pub hrv: bool,
  pub body_composition: bool,
}

impl Default for MetricFamilies {
  fn default() -> Self {
    Self {
      activities: true,
      daily: true,
      sleep: true,
      hrv: true,
      body_composition: true,
    }
  }
}

impl MetricFamilies {
  pub fn none() -> Self {
    Self {
      activities: false,
      daily: false,
      sleep: false,
      hrv: false,
      body_composition: false,
    }
  }

  /// True if any per-day health family is enabled
  pub fn any_daily_health(&self) -> bool {
    self.daily || self.sleep || self.hrv
  }
}

impl FromStr for MetricFamilies {
  type Err = ConfigError;

  /// Comma-separated list, e.g. `activities,sleep,hrv`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut families = Self::none();
    for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
      match name.to_ascii_lowercase().as_str() {
        "activities" => families.activities = true,
        "daily" => families.daily = true,
        "sleep" => families.sleep = true,
        "hrv" => families.hrv = true,
        "body_composition" => families.body_composition = true,
        _ => {
          return Err(ConfigError::Invalid {
            name: "SYNC_FAMILIES",
            value: name.to_string(),
          })
        }
      }
    }
    Ok(families)
  }
}

/// ---------------------------------------------------------------------------
/// Sync Settings
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
  /// Days back from today, today included
  pub window_days: i64,
  pub activity_limit: u32,
  /// Allowed distance in days between an activity and the planned entry it
  /// completes. 0 means same calendar date only.
  pub match_window_days: i64,
  pub families: MetricFamilies,
  pub fetch_activity_details: bool,
  pub request_timeout: Duration,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      window_days: DEFAULT_WINDOW_DAYS,
      activity_limit: DEFAULT_ACTIVITY_LIMIT,
      match_window_days: 0,
      families: MetricFamilies::default(),
      fetch_activity_details: true,
      request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
    }
  }
}

impl SyncConfig {
  fn from_process_env() -> Result<Self, ConfigError> {
    let defaults = Self::default();

    let window_days = parse_var("SYNC_WINDOW_DAYS", defaults.window_days)?;
    if window_days < 1 {
      return Err(ConfigError::Invalid {
        name: "SYNC_WINDOW_DAYS",
        value: window_days.to_string(),
      });
    }
    let match_window_days = parse_var("SYNC_MATCH_WINDOW_DAYS", defaults.match_window_days)?;
    if match_window_days < 0 {
      return Err(ConfigError::Invalid {
        name: "SYNC_MATCH_WINDOW_DAYS",
        value: match_window_days.to_string(),
      });
    }

    Ok(Self {
      window_days,
      activity_limit: parse_var("SYNC_ACTIVITY_LIMIT", defaults.activity_limit)?,
      match_window_days,
      families: parse_var("SYNC_FAMILIES", defaults.families)?,
      fetch_activity_details: parse_bool_var("SYNC_FETCH_DETAILS", defaults.fetch_activity_details)?,
      request_timeout: Duration::from_secs(parse_var(
        "SYNC_REQUEST_TIMEOUT_SECS",
        DEFAULT_REQUEST_TIMEOUT_SECS,
      )?),
    })
  }
}

/// ---------------------------------------------------------------------------
/// Application Config
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Pretty,
  Json,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub sync: SyncConfig,
  /// `None` when `PROVIDER_WORKER_CMD` is unset; only MCP-backed providers need it
  pub worker: Option<WorkerCommand>,
  pub log_format: LogFormat,
}

impl Config {
  /// Load `.env` (if present) and read the process environment.
  pub fn from_env() -> Result<Self, ConfigError> {
    dotenvy::dotenv().ok();
    Self::from_process_env()
  }

  /// Read the process environment only.
  pub fn from_process_env() -> Result<Self, ConfigError> {
    let worker = env::var("PROVIDER_WORKER_CMD")
      .ok()
      .map(|cmd| cmd.trim().to_string())
      .filter(|cmd| !cmd.is_empty())
      .map(|program| {
        let args = env::var("PROVIDER_WORKER_ARGS").unwrap_or_default();
        WorkerCommand::new(program).with_args(args.split_whitespace())
      });

    let log_format = match env::var("LOG_FORMAT").ok().as_deref().map(str::trim) {
      Some("json") => LogFormat::Json,
      _ => LogFormat::Pretty,
    };

    Ok(Self {
      database_url: env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
      sync: SyncConfig::from_process_env()?,
      worker,
      log_format,
    })
  }

  pub fn require_worker(&self) -> Result<&WorkerCommand, ConfigError> {
    self.worker.as_ref().ok_or(ConfigError::Missing("PROVIDER_WORKER_CMD"))
  }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
  match env::var(name) {
    Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| ConfigError::Invalid {
      name,
      value: raw,
    }),
    _ => Ok(default),
  }
}

fn parse_bool_var(name: &'static str, default: bool) -> Result<bool, ConfigError> {
  match env::var(name) {
    Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
      "" => Ok(default),
      "1" | "true" | "yes" | "on" => Ok(true),
      "0" | "false" | "no" | "off" => Ok(false),
      _ => Err(ConfigError::Invalid { name, value: raw }),
    },
    Err(_) => Ok(default),
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
