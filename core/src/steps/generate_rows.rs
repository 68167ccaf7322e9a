// stepflow/src/steps/generate_rows.rs

//! Source step producing a fixed number of rows: a sequence field plus any
//! constant string fields declared as `value.<name>` settings.

use crate::core::context::StepContext;
use crate::core::control::StepControl;
use crate::core::step::{InputRow, RowEmitter, StepLogic};
use crate::error::StepflowResult;
use crate::row::{Row, RowShape, Value, ValueDescriptor};

const CONSTANT_PREFIX: &str = "value.";

#[derive(Debug)]
pub struct GenerateRowsStep {
  limit: u64,
  next: i64,
  produced: u64,
  constants: Vec<Value>,
  shape: RowShape,
}

impl GenerateRowsStep {
  /// Settings: `limit` (required), `field` (default `id`), `start` (default 1).
  /// With several copies each copy produces `limit` rows.
  pub fn from_context(ctx: &StepContext) -> StepflowResult<Self> {
    let limit: u64 = ctx.required_setting("limit")?;
    let start: i64 = ctx.parsed_setting("start")?.unwrap_or(1);
    let field = ctx.setting("field").unwrap_or("id");
    let mut step = Self::new(field, start, limit);
    for (key, value) in &ctx.node.settings {
      if let Some(name) = key.strip_prefix(CONSTANT_PREFIX) {
        step = step.with_constant(name, value.clone());
      }
    }
    Ok(step)
  }

  pub fn new(field: &str, start: i64, limit: u64) -> Self {
    let shape = RowShape::new();
    shape.add_value(ValueDescriptor::integer(field));
    Self {
      limit,
      next: start,
      produced: 0,
      constants: Vec::new(),
      shape,
    }
  }

  pub fn with_constant(mut self, name: &str, value: impl Into<String>) -> Self {
    self.shape.add_value(ValueDescriptor::string(name));
    self.constants.push(Value::String(value.into()));
    self
  }

  pub fn shape(&self) -> &RowShape {
    &self.shape
  }
}

impl StepLogic for GenerateRowsStep {
  fn process(&mut self, _input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    if self.produced >= self.limit {
      return Ok(StepControl::Done);
    }
    let mut row = Row::with_capacity(1 + self.constants.len());
    row.push(Value::Integer(self.next));
    row.extend(self.constants.iter().cloned());
    out.emit(row, &self.shape);
    self.next += 1;
    self.produced += 1;
    Ok(if self.produced >= self.limit {
      StepControl::Done
    } else {
      StepControl::Continue
    })
  }
}
