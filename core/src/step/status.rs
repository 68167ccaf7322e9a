// stepflow/src/step/status.rs

//! Lifecycle state and counters of one step copy, shared between the
//! runner thread and the coordinator.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Created,
  Initialized,
  Running,
  Stopping,
  Finished,
  Error,
}

impl StepStatus {
  fn from_u8(raw: u8) -> Self {
    match raw {
      0 => StepStatus::Created,
      1 => StepStatus::Initialized,
      2 => StepStatus::Running,
      3 => StepStatus::Stopping,
      4 => StepStatus::Finished,
      _ => StepStatus::Error,
    }
  }

  fn as_u8(self) -> u8 {
    match self {
      StepStatus::Created => 0,
      StepStatus::Initialized => 1,
      StepStatus::Running => 2,
      StepStatus::Stopping => 3,
      StepStatus::Finished => 4,
      StepStatus::Error => 5,
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, StepStatus::Finished | StepStatus::Error)
  }
}

impl fmt::Display for StepStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      StepStatus::Created => "created",
      StepStatus::Initialized => "initialized",
      StepStatus::Running => "running",
      StepStatus::Stopping => "stopping",
      StepStatus::Finished => "finished",
      StepStatus::Error => "error",
    };
    f.write_str(s)
  }
}

/// Counters and status of one copy. Written by its runner, read by anyone.
#[derive(Debug)]
pub struct StepMetrics {
  step_name: String,
  copy: usize,
  status: AtomicU8,
  stopped: AtomicBool,
  lines_read: AtomicU64,
  lines_written: AtomicU64,
  lines_rejected: AtomicU64,
  errors: AtomicU64,
  stalls: AtomicU64,
  error_messages: Mutex<Vec<String>>,
}

impl StepMetrics {
  pub fn new(step_name: impl Into<String>, copy: usize) -> Self {
    Self {
      step_name: step_name.into(),
      copy,
      status: AtomicU8::new(StepStatus::Created.as_u8()),
      stopped: AtomicBool::new(false),
      lines_read: AtomicU64::new(0),
      lines_written: AtomicU64::new(0),
      lines_rejected: AtomicU64::new(0),
      errors: AtomicU64::new(0),
      stalls: AtomicU64::new(0),
      error_messages: Mutex::new(Vec::new()),
    }
  }

  pub fn step_name(&self) -> &str {
    &self.step_name
  }

  pub fn copy(&self) -> usize {
    self.copy
  }

  pub fn status(&self) -> StepStatus {
    StepStatus::from_u8(self.status.load(Ordering::SeqCst))
  }

  pub(crate) fn set_status(&self, status: StepStatus) {
    self.status.store(status.as_u8(), Ordering::SeqCst);
  }

  /// True when the copy ended because of a stop request rather than input exhaustion.
  pub fn was_stopped(&self) -> bool {
    self.stopped.load(Ordering::SeqCst)
  }

  pub(crate) fn mark_stopped(&self) {
    self.stopped.store(true, Ordering::SeqCst);
  }

  pub fn lines_read(&self) -> u64 {
    self.lines_read.load(Ordering::Relaxed)
  }

  pub fn lines_written(&self) -> u64 {
    self.lines_written.load(Ordering::Relaxed)
  }

  pub fn lines_rejected(&self) -> u64 {
    self.lines_rejected.load(Ordering::Relaxed)
  }

  pub fn errors(&self) -> u64 {
    self.errors.load(Ordering::Relaxed)
  }

  pub fn stalls(&self) -> u64 {
    self.stalls.load(Ordering::Relaxed)
  }

  pub fn error_messages(&self) -> Vec<String> {
    self.error_messages.lock().clone()
  }

  pub(crate) fn incr_read(&self) {
    self.lines_read.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn incr_written(&self) {
    self.lines_written.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn incr_rejected(&self) {
    self.lines_rejected.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn incr_stalls(&self) {
    self.stalls.fetch_add(1, Ordering::Relaxed);
  }

  /// Counts one error and keeps its message.
  pub(crate) fn record_error(&self, message: String) {
    self.errors.fetch_add(1, Ordering::Relaxed);
    self.error_messages.lock().push(message);
  }

  pub fn report(&self) -> StepReport {
    StepReport {
      step_name: self.step_name.clone(),
      copy: self.copy,
      status: self.status(),
      stopped: self.was_stopped(),
      lines_read: self.lines_read(),
      lines_written: self.lines_written(),
      lines_rejected: self.lines_rejected(),
      errors: self.errors(),
      stalls: self.stalls(),
    }
  }
}

/// Point-in-time copy of a [`StepMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
  pub step_name: String,
  pub copy: usize,
  pub status: StepStatus,
  pub stopped: bool,
  pub lines_read: u64,
  pub lines_written: u64,
  pub lines_rejected: u64,
  pub errors: u64,
  pub stalls: u64,
}
