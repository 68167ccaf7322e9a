// stepflow/src/pipeline/result.rs

use crate::step::status::{StepReport, StepStatus};
use serde::Serialize;
use std::time::Duration;

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
  /// Every copy drained its inputs and finished.
  Finished,
  /// Stopped on request before all rows were processed.
  Stopped,
  /// At least one copy failed.
  Failed,
}

/// Aggregated outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
  pub pipeline_name: String,
  pub outcome: PipelineOutcome,
  pub lines_read: u64,
  pub lines_written: u64,
  pub lines_rejected: u64,
  pub errors: u64,
  pub stalls: u64,
  pub error_messages: Vec<String>,
  pub steps: Vec<StepReport>,
  #[serde(skip)]
  pub duration: Duration,
}

impl PipelineResult {
  pub(crate) fn from_reports(
    pipeline_name: &str,
    steps: Vec<StepReport>,
    error_messages: Vec<String>,
    duration: Duration,
  ) -> Self {
    // Routed row errors leave their copy Finished; only fatal ones fail the run.
    let failed = steps.iter().any(|s| s.status == StepStatus::Error);
    let stopped = steps.iter().any(|s| s.stopped);
    let outcome = if failed {
      PipelineOutcome::Failed
    } else if stopped {
      PipelineOutcome::Stopped
    } else {
      PipelineOutcome::Finished
    };
    Self {
      pipeline_name: pipeline_name.to_string(),
      outcome,
      lines_read: steps.iter().map(|s| s.lines_read).sum(),
      lines_written: steps.iter().map(|s| s.lines_written).sum(),
      lines_rejected: steps.iter().map(|s| s.lines_rejected).sum(),
      errors: steps.iter().map(|s| s.errors).sum(),
      stalls: steps.iter().map(|s| s.stalls).sum(),
      error_messages,
      steps,
      duration,
    }
  }

  pub fn is_success(&self) -> bool {
    self.outcome == PipelineOutcome::Finished && self.errors == 0
  }

  /// Reports of every copy of `step_name`, in copy order.
  pub fn step(&self, step_name: &str) -> Vec<&StepReport> {
    let mut copies: Vec<&StepReport> = self.steps.iter().filter(|s| s.step_name == step_name).collect();
    copies.sort_by_key(|s| s.copy);
    copies
  }

  /// Rows read by all copies of `step_name`.
  pub fn lines_read_by(&self, step_name: &str) -> u64 {
    self.step(step_name).iter().map(|s| s.lines_read).sum()
  }

  /// Rows written by all copies of `step_name`.
  pub fn lines_written_by(&self, step_name: &str) -> u64 {
    self.step(step_name).iter().map(|s| s.lines_written).sum()
  }
}
