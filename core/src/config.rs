// stepflow/src/config.rs

//! Engine-wide configuration: row-set size, queue and socket timeouts and
//! cluster port defaults.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! A pipeline graph may still override `row_set_size` for itself.

use crate::error::{StepflowError, StepflowResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{event, Level};

/// Environment variable overriding [`EngineConfig::row_set_size`].
pub const ROW_SET_SIZE_ENV: &str = "STEPFLOW_ROW_SET_SIZE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Capacity of every row queue, in rows.
  pub row_set_size: usize,
  /// How long a runner blocks on a single queue get/put before it re-checks
  /// the stop flag.
  pub queue_timeout_ms: u64,
  /// An input wait longer than this is reported as a stall.
  pub stall_warning_ms: u64,
  /// Read/write/accept timeout of cluster sockets.
  pub socket_timeout_ms: u64,
  /// Delay between connection attempts of a socket reader.
  pub socket_connect_retry_ms: u64,
  /// First port handed out by the cluster splitter when a schema has none.
  pub base_port: u16,
  /// A socket writer flushes its buffer after this many rows.
  pub socket_flush_rows: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      row_set_size: 10_000,
      queue_timeout_ms: 50,
      stall_warning_ms: 5_000,
      socket_timeout_ms: 30_000,
      socket_connect_retry_ms: 100,
      base_port: 40_000,
      socket_flush_rows: 250,
    }
  }
}

impl EngineConfig {
  pub fn from_toml_str(source: &str) -> StepflowResult<Self> {
    let config: EngineConfig =
      toml::from_str(source).map_err(|e| StepflowError::Config(format!("invalid TOML: {e}")))?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: impl AsRef<Path>) -> StepflowResult<Self> {
    let path = path.as_ref();
    event!(Level::DEBUG, path = %path.display(), "Loading engine configuration.");
    let source = std::fs::read_to_string(path)?;
    Self::from_toml_str(&source)
  }

  /// Applies overrides from the process environment.
  pub fn with_env_overrides(mut self) -> StepflowResult<Self> {
    if let Ok(raw) = std::env::var(ROW_SET_SIZE_ENV) {
      self.row_set_size = raw
        .trim()
        .parse()
        .map_err(|_| StepflowError::Config(format!("{ROW_SET_SIZE_ENV} must be a positive integer, got '{raw}'")))?;
    }
    self.validate()?;
    Ok(self)
  }

  pub fn validate(&self) -> StepflowResult<()> {
    if self.row_set_size == 0 {
      return Err(StepflowError::Config("row_set_size must be at least 1".to_string()));
    }
    if self.queue_timeout_ms == 0 {
      return Err(StepflowError::Config("queue_timeout_ms must be at least 1".to_string()));
    }
    if self.socket_timeout_ms == 0 {
      return Err(StepflowError::Config("socket_timeout_ms must be at least 1".to_string()));
    }
    if self.socket_flush_rows == 0 {
      return Err(StepflowError::Config("socket_flush_rows must be at least 1".to_string()));
    }
    Ok(())
  }

  pub fn queue_timeout(&self) -> Duration {
    Duration::from_millis(self.queue_timeout_ms)
  }

  pub fn stall_warning(&self) -> Duration {
    Duration::from_millis(self.stall_warning_ms)
  }

  pub fn socket_timeout(&self) -> Duration {
    Duration::from_millis(self.socket_timeout_ms)
  }

  pub fn socket_connect_retry(&self) -> Duration {
    Duration::from_millis(self.socket_connect_retry_ms)
  }
}
