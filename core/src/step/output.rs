// stepflow/src/step/output.rs

//! The queues one step copy writes to for a single outgoing hop, and how a
//! row picks among them.

use crate::core::control::PipelineSignals;
use crate::error::{StepflowError, StepflowResult};
use crate::partition::{PartitionAssignment, PartitionMethod, PartitionRouter};
use crate::pipeline::definition::HopGroup;
use crate::queue::{PutError, RowQueue};
use crate::row::{Row, RowShape};
use std::sync::Arc;
use std::time::Duration;

/// How a source copy chooses among the queues of one hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopRouting {
  /// Exactly one queue for this copy (1:1, N:1 or paired N:N).
  Direct,
  /// Rotate over the target copies.
  RoundRobin,
  /// Route by the target step's partitioning; `Mirror` broadcasts.
  Partitioned(PartitionAssignment),
}

enum Target {
  One(usize),
  All,
}

/// One outgoing hop as seen by one source copy.
#[derive(Debug)]
pub struct OutputHop {
  target_step: String,
  /// Indexed by target copy when there is more than one.
  queues: Vec<Arc<RowQueue>>,
  routing: HopRouting,
  group: Option<HopGroup>,
  next: usize,
}

impl OutputHop {
  pub fn new(target_step: impl Into<String>, queues: Vec<Arc<RowQueue>>, routing: HopRouting) -> Self {
    Self {
      target_step: target_step.into(),
      queues,
      routing,
      group: None,
      next: 0,
    }
  }

  pub fn with_group(mut self, group: Option<HopGroup>) -> Self {
    self.group = group;
    self
  }

  pub fn target_step(&self) -> &str {
    &self.target_step
  }

  pub fn queues(&self) -> &[Arc<RowQueue>] {
    &self.queues
  }

  pub fn routing(&self) -> &HopRouting {
    &self.routing
  }

  pub fn group(&self) -> Option<&HopGroup> {
    self.group.as_ref()
  }

  fn select(&mut self, row: &Row, shape: &RowShape) -> StepflowResult<Target> {
    if self.queues.len() == 1 {
      return Ok(Target::One(0));
    }
    match &self.routing {
      HopRouting::Direct => Ok(Target::One(0)),
      HopRouting::RoundRobin => {
        let idx = self.next % self.queues.len();
        self.next = (idx + 1) % self.queues.len();
        Ok(Target::One(idx))
      }
      HopRouting::Partitioned(assignment) if assignment.method == PartitionMethod::Mirror => Ok(Target::All),
      HopRouting::Partitioned(assignment) => {
        PartitionRouter::route(row, shape, assignment, self.queues.len()).map(Target::One)
      }
    }
  }

  /// Enqueues `row` on the queue(s) chosen by the routing, blocking while
  /// they are full. Returns `Ok(false)` if the pipeline was stopped before
  /// every chosen queue accepted the row.
  pub(crate) fn send(
    &mut self,
    row: Row,
    shape: RowShape,
    signals: &PipelineSignals,
    timeout: Duration,
  ) -> StepflowResult<bool> {
    if self.queues.is_empty() {
      return Err(StepflowError::Internal(format!("hop to '{}' has no queues", self.target_step)));
    }
    match self.select(&row, &shape)? {
      Target::One(idx) => put_blocking(&self.queues[idx], row, shape, signals, timeout),
      Target::All => {
        let last = self.queues.len() - 1;
        for queue in &self.queues[..last] {
          if !put_blocking(queue, row.clone(), shape.clone(), signals, timeout)? {
            return Ok(false);
          }
        }
        put_blocking(&self.queues[last], row, shape, signals, timeout)
      }
    }
  }

  pub(crate) fn mark_done(&self) {
    for queue in &self.queues {
      queue.mark_done();
    }
  }
}

/// Puts with `timeout` slices until the row is accepted or the pipeline stops.
pub(crate) fn put_blocking(
  queue: &RowQueue,
  row: Row,
  shape: RowShape,
  signals: &PipelineSignals,
  timeout: Duration,
) -> StepflowResult<bool> {
  let (mut row, mut shape) = (row, shape);
  loop {
    match queue.put(row, shape, timeout) {
      Ok(()) => return Ok(true),
      Err(PutError::Full(back)) => {
        if signals.is_stopped() {
          return Ok(false);
        }
        row = back.row;
        shape = back.shape;
      }
      Err(PutError::Done(_)) => {
        return Err(StepflowError::QueueClosed {
          queue: queue.id().to_string(),
        })
      }
    }
  }
}
