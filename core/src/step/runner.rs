// stepflow/src/step/runner.rs

//! Drives one copy of one step on its own thread: reads input queues
//! round-robin, calls the step logic, distributes emitted rows, routes or
//! escalates row errors and reports counters.

use super::error_handling::ErrorHandling;
use super::output::OutputHop;
use super::status::{StepMetrics, StepStatus};
use crate::core::context::StepContext;
use crate::core::control::{PipelineSignals, StepControl};
use crate::core::step::{InputRow, RowEmitter, StepLogic};
use crate::error::{StepflowError, StepflowResult};
use crate::partition::PartitionRouter;
use crate::pipeline::definition::Distribution;
use crate::queue::{QueueRead, RowQueue};
use crate::row::{Row, RowShape, ShapeSnapshot};
use crossbeam_channel::Select;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{event, span, Level};

const PAUSE_POLL: Duration = Duration::from_millis(10);

enum Exit {
  Completed,
  Stopped,
}

enum NextInput {
  Row(InputRow),
  Idle,
  Exhausted,
}

struct InputQueue {
  queue: Arc<RowQueue>,
  from_step: String,
  from_copy: usize,
}

/// The input queues of one copy, read round-robin. Exhausted queues are
/// dropped from the rotation.
struct InputSet {
  queues: Vec<InputQueue>,
  cursor: usize,
}

impl InputSet {
  fn new(queues: Vec<Arc<RowQueue>>) -> Self {
    let queues = queues
      .into_iter()
      .map(|queue| InputQueue {
        from_step: queue.id().from_step.clone(),
        from_copy: queue.id().from_copy,
        queue,
      })
      .collect();
    Self { queues, cursor: 0 }
  }

  fn is_empty(&self) -> bool {
    self.queues.is_empty()
  }

  fn next(&mut self, timeout: Duration) -> NextInput {
    'scan: loop {
      if self.queues.is_empty() {
        return NextInput::Exhausted;
      }
      let n = self.queues.len();
      for offset in 0..n {
        let idx = (self.cursor + offset) % n;
        match self.queues[idx].queue.try_get() {
          QueueRead::Row(item) => {
            self.cursor = (idx + 1) % n;
            let input = &self.queues[idx];
            return NextInput::Row(InputRow {
              row: item.row,
              shape: item.shape,
              from_step: input.from_step.clone(),
              from_copy: input.from_copy,
            });
          }
          QueueRead::Done => {
            self.queues.remove(idx);
            if self.cursor >= self.queues.len() {
              self.cursor = 0;
            }
            continue 'scan;
          }
          QueueRead::Empty => {}
        }
      }
      // Nothing buffered anywhere: wait for any queue to become readable.
      let mut select = Select::new();
      for input in &self.queues {
        select.recv(input.queue.receiver());
      }
      if select.ready_timeout(timeout).is_err() {
        return NextInput::Idle;
      }
    }
  }
}

/// Outgoing hops as the step's distribution sees them: one plain hop, or
/// the members of a hop group that `distribution` picks among.
struct OutputTarget {
  group: Option<String>,
  hops: Vec<usize>,
  distribution: Distribution,
  next: usize,
}

fn output_targets(outputs: &[OutputHop]) -> Vec<OutputTarget> {
  let mut targets: Vec<OutputTarget> = Vec::new();
  for (idx, hop) in outputs.iter().enumerate() {
    let Some(group) = hop.group() else {
      targets.push(OutputTarget {
        group: None,
        hops: vec![idx],
        distribution: Distribution::RoundRobin,
        next: 0,
      });
      continue;
    };
    match targets.iter_mut().find(|t| t.group.as_deref() == Some(group.target.as_str())) {
      Some(target) => target.hops.push(idx),
      None => targets.push(OutputTarget {
        group: Some(group.target.clone()),
        hops: vec![idx],
        distribution: group.distribution.clone(),
        next: 0,
      }),
    }
  }
  targets
}

/// Executes one step copy. Built and initialized by the coordinator, then
/// moved onto its own thread by [`StepRunner::run`].
pub struct StepRunner {
  ctx: StepContext,
  logic: Box<dyn StepLogic>,
  inputs: InputSet,
  outputs: Vec<OutputHop>,
  targets: Vec<OutputTarget>,
  error_hop: Option<OutputHop>,
  error_handling: Option<ErrorHandling>,
  error_shape: Option<(Arc<ShapeSnapshot>, RowShape)>,
  metrics: Arc<StepMetrics>,
  signals: Arc<PipelineSignals>,
  next_output: usize,
  disposed: bool,
}

impl StepRunner {
  pub(crate) fn new(
    ctx: StepContext,
    logic: Box<dyn StepLogic>,
    inputs: Vec<Arc<RowQueue>>,
    outputs: Vec<OutputHop>,
    error_hop: Option<OutputHop>,
  ) -> Self {
    let metrics = Arc::new(StepMetrics::new(ctx.node.name.clone(), ctx.copy));
    let signals = Arc::clone(ctx.stop.signals());
    let error_handling = ctx.node.error_handling.clone();
    Self {
      ctx,
      logic,
      inputs: InputSet::new(inputs),
      targets: output_targets(&outputs),
      outputs,
      error_hop,
      error_handling,
      error_shape: None,
      metrics,
      signals,
      next_output: 0,
      disposed: false,
    }
  }

  pub fn step_name(&self) -> &str {
    &self.ctx.node.name
  }

  pub fn copy(&self) -> usize {
    self.ctx.copy
  }

  pub fn metrics(&self) -> Arc<StepMetrics> {
    Arc::clone(&self.metrics)
  }

  fn label(&self) -> String {
    format!("{}.{}", self.ctx.node.name, self.ctx.copy)
  }

  /// Runs the logic's `init`. On failure the copy stays `Created` and the
  /// error is recorded in its metrics.
  pub(crate) fn init(&mut self) -> StepflowResult<()> {
    match self.logic.init(&self.ctx) {
      Ok(()) => {
        self.metrics.set_status(StepStatus::Initialized);
        Ok(())
      }
      Err(source) => {
        let err = StepflowError::InitFailed {
          step_name: self.ctx.node.name.clone(),
          copy: self.ctx.copy,
          source,
        };
        event!(Level::ERROR, step = %self.label(), error = %err, "Step copy failed to initialize.");
        self.metrics.record_error(err.to_string());
        Err(err)
      }
    }
  }

  /// Releases a copy that will never be started.
  pub(crate) fn abandon(mut self) {
    self.close_outputs();
    self.logic.dispose();
  }

  /// Thread body. Never panics: a panicking step is recorded as an error.
  pub(crate) fn run(mut self) {
    let span = span!(Level::INFO, "step_runner", step = %self.ctx.node.name, copy = self.ctx.copy);
    let _enter = span.enter();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_to_end()));
    if let Err(payload) = outcome {
      let message = panic_message(payload.as_ref());
      event!(Level::ERROR, panic = %message, "Step copy panicked.");
      self.fail(StepflowError::Internal(format!("step panicked: {message}")));
      self.close_outputs();
      if !self.disposed && panic::catch_unwind(AssertUnwindSafe(|| self.dispose())).is_err() {
        event!(Level::ERROR, "Step copy panicked again while disposing.");
      }
    }
  }

  fn run_to_end(&mut self) {
    self.metrics.set_status(StepStatus::Running);
    event!(Level::DEBUG, inputs = self.inputs.queues.len(), outputs = self.outputs.len(), "Step copy started.");

    let exit = match self.process_rows() {
      Ok(Exit::Completed) => self.finish_logic(),
      other => other,
    };
    match exit {
      Ok(Exit::Completed) => self.metrics.set_status(StepStatus::Finished),
      Ok(Exit::Stopped) => {
        self.metrics.set_status(StepStatus::Stopping);
        self.metrics.mark_stopped();
        event!(Level::DEBUG, "Step copy stopped on request.");
        self.metrics.set_status(StepStatus::Finished);
      }
      Err(err) => self.fail(err),
    }

    self.close_outputs();
    self.dispose();
    event!(
      Level::DEBUG,
      read = self.metrics.lines_read(),
      written = self.metrics.lines_written(),
      rejected = self.metrics.lines_rejected(),
      errors = self.metrics.errors(),
      "Step copy ended."
    );
  }

  fn dispose(&mut self) {
    self.disposed = true;
    self.logic.dispose();
  }

  fn fail(&self, err: StepflowError) {
    event!(Level::ERROR, error = %err, "Step copy failed, stopping the pipeline.");
    self.metrics.record_error(format!("{}: {}", self.label(), err));
    self.metrics.set_status(StepStatus::Error);
    self.signals.stop_all();
  }

  fn process_rows(&mut self) -> StepflowResult<Exit> {
    let mut out = RowEmitter::new();
    let timeout = self.ctx.config.queue_timeout();
    let stall_after = self.ctx.config.stall_warning();
    let is_source = self.inputs.is_empty();
    let mut idle_since: Option<Instant> = None;
    let mut stall_reported = false;

    loop {
      if self.signals.is_stopped() {
        return Ok(Exit::Stopped);
      }
      if self.signals.is_paused() {
        thread::sleep(PAUSE_POLL);
        continue;
      }

      if is_source {
        match self.logic.process(None, &mut out) {
          Ok(control) => {
            if !self.flush(&mut out)? {
              return Ok(Exit::Stopped);
            }
            if control == StepControl::Done {
              return Ok(Exit::Completed);
            }
          }
          Err(err) => {
            out.clear();
            return Err(escalate(err));
          }
        }
        continue;
      }

      match self.inputs.next(timeout) {
        NextInput::Exhausted => return Ok(Exit::Completed),
        NextInput::Idle => {
          let since = *idle_since.get_or_insert_with(Instant::now);
          if !stall_reported && since.elapsed() >= stall_after {
            stall_reported = true;
            self.metrics.incr_stalls();
            event!(
              Level::WARN,
              waited_ms = since.elapsed().as_millis() as u64,
              "No input rows arrived for a while; upstream may be stalled."
            );
          }
        }
        NextInput::Row(input) => {
          idle_since = None;
          stall_reported = false;
          self.metrics.incr_read();
          match self.logic.process(Some(&input), &mut out) {
            Ok(_) => {
              if !self.flush(&mut out)? {
                return Ok(Exit::Stopped);
              }
            }
            Err(err) => {
              // A failed row emits nothing.
              out.clear();
              if !self.handle_row_error(&input, err)? {
                return Ok(Exit::Stopped);
              }
            }
          }
        }
      }
    }
  }

  fn finish_logic(&mut self) -> StepflowResult<Exit> {
    let mut out = RowEmitter::new();
    self.logic.finish(&mut out).map_err(escalate)?;
    if self.flush(&mut out)? {
      Ok(Exit::Completed)
    } else {
      Ok(Exit::Stopped)
    }
  }

  /// Routes a failed row to the error hop, or escalates when none is
  /// configured. Engine errors (socket, queue, ...) always escalate.
  fn handle_row_error(&mut self, input: &InputRow, err: anyhow::Error) -> StepflowResult<bool> {
    if err.downcast_ref::<StepflowError>().is_some() {
      return Err(escalate(err));
    }
    let (Some(handling), Some(hop)) = (self.error_handling.as_ref(), self.error_hop.as_mut()) else {
      return Err(escalate(err));
    };

    let snapshot = input.shape.snapshot();
    let shape = match &self.error_shape {
      Some((source, shape)) if Arc::ptr_eq(source, &snapshot) => shape.clone(),
      _ => {
        let shape = handling.error_shape(&input.shape);
        self.error_shape = Some((snapshot, shape.clone()));
        shape
      }
    };
    let row = handling.error_row(&input.row, &err);
    let description = format!("{err:#}");
    event!(Level::DEBUG, error = %description, target = %hop.target_step(), "Row routed to error hop.");
    self
      .metrics
      .record_error(format!("{}.{}: {}", self.ctx.node.name, self.ctx.copy, description));

    if !hop.send(row, shape, &self.signals, self.ctx.config.queue_timeout())? {
      return Ok(false);
    }
    self.metrics.incr_rejected();

    match handling.breached(self.metrics.lines_rejected(), self.metrics.lines_read()) {
      Some(message) => Err(StepflowError::ErrorThreshold {
        step_name: self.ctx.node.name.clone(),
        message,
      }),
      None => Ok(true),
    }
  }

  /// Sends every emitted row. `Ok(false)` means the pipeline stopped while
  /// waiting for queue space.
  fn flush(&mut self, out: &mut RowEmitter) -> StepflowResult<bool> {
    let timeout = self.ctx.config.queue_timeout();
    for emitted in out.drain() {
      let delivered = match emitted.target {
        Some(target) => {
          let grouped = self.targets.iter().position(|t| t.group.as_deref() == Some(target.as_str()));
          if let Some(idx) = grouped {
            self.send_to_target(idx, emitted.row, emitted.shape, timeout)?
          } else {
            let hop = self
              .outputs
              .iter_mut()
              .chain(self.error_hop.iter_mut())
              .find(|hop| hop.target_step() == target)
              .ok_or(StepflowError::UnknownStep { step_name: target })?;
            hop.send(emitted.row, emitted.shape, &self.signals, timeout)?
          }
        }
        None => {
          if self.outputs.is_empty() {
            continue;
          }
          self.distribute(emitted.row, emitted.shape, timeout)?
        }
      };
      if !delivered {
        return Ok(false);
      }
      self.metrics.incr_written();
    }
    Ok(true)
  }

  fn distribute(&mut self, row: Row, shape: RowShape, timeout: Duration) -> StepflowResult<bool> {
    let count = self.targets.len();
    match &self.ctx.node.distribution {
      Distribution::RoundRobin => {
        let idx = self.next_output % count;
        self.next_output = (idx + 1) % count;
        self.send_to_target(idx, row, shape, timeout)
      }
      Distribution::Copy => {
        for idx in 0..count - 1 {
          if !self.send_to_target(idx, row.clone(), shape.clone(), timeout)? {
            return Ok(false);
          }
        }
        self.send_to_target(count - 1, row, shape, timeout)
      }
      Distribution::Keyed { field } => {
        let idx = PartitionRouter::route_by_field(&row, &shape, field, count)?;
        self.send_to_target(idx, row, shape, timeout)
      }
    }
  }

  /// Sends to a plain hop, or to the member(s) of a hop group its own
  /// distribution selects.
  fn send_to_target(&mut self, idx: usize, row: Row, shape: RowShape, timeout: Duration) -> StepflowResult<bool> {
    let target = &mut self.targets[idx];
    let members = target.hops.len();
    match &target.distribution {
      Distribution::RoundRobin => {
        let pick = target.hops[target.next % members];
        target.next = (target.next + 1) % members;
        self.outputs[pick].send(row, shape, &self.signals, timeout)
      }
      Distribution::Copy => {
        let Some((&last, rest)) = target.hops.split_last() else {
          return Ok(true);
        };
        for &pick in rest {
          if !self.outputs[pick].send(row.clone(), shape.clone(), &self.signals, timeout)? {
            return Ok(false);
          }
        }
        self.outputs[last].send(row, shape, &self.signals, timeout)
      }
      Distribution::Keyed { field } => {
        let pick = target.hops[PartitionRouter::route_by_field(&row, &shape, field, members)?];
        self.outputs[pick].send(row, shape, &self.signals, timeout)
      }
    }
  }

  fn close_outputs(&self) {
    for hop in self.outputs.iter().chain(self.error_hop.iter()) {
      hop.mark_done();
    }
  }
}

/// Engine errors raised inside step logic keep their identity; anything
/// else is a step logic failure.
fn escalate(err: anyhow::Error) -> StepflowError {
  match err.downcast::<StepflowError>() {
    Ok(engine) => engine,
    Err(other) => StepflowError::StepLogic { source: other },
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
