//! Provider lookup by name
//!
//! The registry is an ordinary value built by the caller and passed down;
//! there is no process-wide instance.

use std::collections::HashMap;
use tracing::info;

use super::mcp_provider::{McpDataProvider, GARMIN_PROVIDER};
use super::{DataProvider, ProviderError};
use crate::config::Config;

/// Builds a provider from application config
pub type ProviderFactory =
  Box<dyn Fn(&Config) -> Result<Box<dyn DataProvider>, ProviderError> + Send + Sync>;

pub struct ProviderRegistry {
  factories: HashMap<String, ProviderFactory>,
}

impl Default for ProviderRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl ProviderRegistry {
  /// An empty registry
  pub fn new() -> Self {
    Self {
      factories: HashMap::new(),
    }
  }

  /// Registry with the built-in providers
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    registry.register(GARMIN_PROVIDER, |config: &Config| {
      let worker = config
        .require_worker()
        .map_err(|e| ProviderError::Config(e.to_string()))?;
      let provider = McpDataProvider::new(worker.clone(), config.sync.request_timeout);
      Ok(Box::new(provider) as Box<dyn DataProvider>)
    });

    info!(
      providers = %registry.supported_providers().join(", "),
      "Provider registry initialized"
    );
    registry
  }

  /// Add or replace the factory for `name`
  pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
  where
    F: Fn(&Config) -> Result<Box<dyn DataProvider>, ProviderError> + Send + Sync + 'static,
  {
    self.factories.insert(name.into(), Box::new(factory));
  }

  pub fn create(&self, name: &str, config: &Config) -> Result<Box<dyn DataProvider>, ProviderError> {
    let factory = self
      .factories
      .get(name)
      .ok_or_else(|| ProviderError::NotRegistered(name.to_string()))?;
    factory(config)
  }

  pub fn is_supported(&self, name: &str) -> bool {
    self.factories.contains_key(name)
  }

  /// Registered names, sorted
  pub fn supported_providers(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }
}
