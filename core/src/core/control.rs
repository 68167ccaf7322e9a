// stepflow/src/core/control.rs

//! Defines signals for controlling step flow and the shared stop/pause flags
//! every runner of a pipeline observes between rows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Signal from step logic indicating whether it wants to be called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
  /// Keep calling `process`.
  Continue,
  /// The step has nothing more to produce. Only meaningful for steps
  /// without input hops; steps with inputs finish when their inputs do.
  Done,
}

/// Flags shared by every runner of one pipeline instance.
///
/// Cancellation is cooperative: runners look at `stopped` between rows and
/// while waiting on a queue, never in the middle of processing a row.
#[derive(Debug, Default)]
pub struct PipelineSignals {
  stopped: AtomicBool,
  paused: AtomicBool,
}

impl PipelineSignals {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop_all(&self) {
    self.stopped.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.stopped.load(Ordering::SeqCst)
  }

  pub fn set_paused(&self, paused: bool) {
    self.paused.store(paused, Ordering::SeqCst);
  }

  pub fn is_paused(&self) -> bool {
    self.paused.load(Ordering::SeqCst)
  }
}

/// Cloneable handle to stop (or pause) a running pipeline from another thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<PipelineSignals>);

impl StopHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn signals(&self) -> &Arc<PipelineSignals> {
    &self.0
  }

  pub fn stop_all(&self) {
    self.0.stop_all();
  }

  pub fn is_stopped(&self) -> bool {
    self.0.is_stopped()
  }

  pub fn pause(&self) {
    self.0.set_paused(true);
  }

  pub fn resume(&self) {
    self.0.set_paused(false);
  }

  pub fn is_paused(&self) -> bool {
    self.0.is_paused()
  }
}
