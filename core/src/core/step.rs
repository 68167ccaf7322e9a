// stepflow/src/core/step.rs

//! The step logic capability every concrete step implements, the row
//! emitter it writes to, and the row-level error type it may raise.

use super::context::StepContext;
use super::control::StepControl;
use crate::row::{Row, RowShape};

/// A row pulled from one of the step's input queues.
#[derive(Debug, Clone)]
pub struct InputRow {
  pub row: Row,
  pub shape: RowShape,
  pub from_step: String,
  pub from_copy: usize,
}

/// Business logic of one step copy. Each copy owns its own instance.
///
/// `process` is called once per input row (round-robin over the input
/// queues), or with `None` repeatedly for steps without inputs until it
/// returns [`StepControl::Done`]. Returning an error marks the current row
/// as failed: it is routed to the step's error hop if one is configured,
/// otherwise the whole pipeline is stopped.
pub trait StepLogic: Send {
  fn init(&mut self, _ctx: &StepContext) -> anyhow::Result<()> {
    Ok(())
  }

  fn process(&mut self, input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl>;

  /// Called once after every input is exhausted, e.g. to flush aggregates.
  fn finish(&mut self, _out: &mut RowEmitter) -> anyhow::Result<()> {
    Ok(())
  }

  /// Always called once when the runner ends, whatever the outcome.
  fn dispose(&mut self) {}
}

// Closures are handy for tests and small inline transforms.
impl<F> StepLogic for F
where
  F: FnMut(Option<&InputRow>, &mut RowEmitter) -> anyhow::Result<StepControl> + Send,
{
  fn process(&mut self, input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    self(input, out)
  }
}

#[derive(Debug, Clone)]
pub(crate) struct EmittedRow {
  pub row: Row,
  pub shape: RowShape,
  pub target: Option<String>,
}

/// Collects the rows produced by one `process` call. The runner distributes
/// them after the call returns.
#[derive(Debug, Default)]
pub struct RowEmitter {
  pending: Vec<EmittedRow>,
}

impl RowEmitter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Emits a row to the step's regular outputs.
  pub fn emit(&mut self, row: Row, shape: &RowShape) {
    self.pending.push(EmittedRow {
      row,
      shape: shape.clone(),
      target: None,
    });
  }

  /// Emits a row to one named target step only.
  pub fn emit_to(&mut self, target_step: &str, row: Row, shape: &RowShape) {
    self.pending.push(EmittedRow {
      row,
      shape: shape.clone(),
      target: Some(target_step.to_string()),
    });
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }

  pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, EmittedRow> {
    self.pending.drain(..)
  }

  pub(crate) fn clear(&mut self) {
    self.pending.clear();
  }
}

/// A row-level failure with the details that end up in the error row.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{description}")]
pub struct RowError {
  pub description: String,
  pub fields: Vec<String>,
  pub code: Option<String>,
}

impl RowError {
  pub fn new(description: impl Into<String>) -> Self {
    Self {
      description: description.into(),
      fields: Vec::new(),
      code: None,
    }
  }

  pub fn field(mut self, field: impl Into<String>) -> Self {
    self.fields.push(field.into());
    self
  }

  pub fn code(mut self, code: impl Into<String>) -> Self {
    self.code = Some(code.into());
    self
  }
}
