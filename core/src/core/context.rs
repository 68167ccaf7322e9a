// stepflow/src/core/context.rs

//! The per-copy context handed to step factories and to `StepLogic::init`.

use crate::config::EngineConfig;
use crate::core::control::StopHandle;
use crate::error::{StepflowError, StepflowResult};
use crate::pipeline::definition::{ConnectionDef, StepNode};
use std::str::FromStr;

/// Everything a step copy may know about where it runs.
#[derive(Debug, Clone)]
pub struct StepContext {
  pub pipeline_name: String,
  pub node: StepNode,
  /// Zero-based copy number of this runner.
  pub copy: usize,
  /// Steps feeding this step over enabled hops.
  pub input_steps: Vec<String>,
  /// Steps this step writes to, excluding the error target.
  pub output_steps: Vec<String>,
  /// Shared resource declarations referenced by the step.
  pub connections: Vec<ConnectionDef>,
  pub config: EngineConfig,
  pub stop: StopHandle,
}

impl StepContext {
  pub fn step_name(&self) -> &str {
    &self.node.name
  }

  pub fn copies(&self) -> usize {
    self.node.copies
  }

  pub fn setting(&self, key: &str) -> Option<&str> {
    self.node.setting(key)
  }

  /// Parses a setting, `Ok(None)` when absent.
  pub fn parsed_setting<T>(&self, key: &str) -> StepflowResult<Option<T>>
  where
    T: FromStr,
    T::Err: std::fmt::Display,
  {
    match self.node.setting(key) {
      None => Ok(None),
      Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| StepflowError::ConfigurationError {
        step_name: self.node.name.clone(),
        message: format!("setting '{key}' has invalid value '{raw}': {e}"),
      }),
    }
  }

  pub fn required_setting<T>(&self, key: &str) -> StepflowResult<T>
  where
    T: FromStr,
    T::Err: std::fmt::Display,
  {
    self.parsed_setting(key)?.ok_or_else(|| StepflowError::ConfigurationError {
      step_name: self.node.name.clone(),
      message: format!("missing required setting '{key}'"),
    })
  }

  pub fn connection(&self, name: &str) -> Option<&ConnectionDef> {
    self.connections.iter().find(|c| c.name == name)
  }
}
