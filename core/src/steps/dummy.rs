// stepflow/src/steps/dummy.rs

use crate::core::control::StepControl;
use crate::core::step::{InputRow, RowEmitter, StepLogic};

/// Passes every input row through unchanged. Without inputs it is done
/// immediately.
#[derive(Debug, Default)]
pub struct DummyStep;

impl StepLogic for DummyStep {
  fn process(&mut self, input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    match input {
      Some(input) => {
        out.emit(input.row.clone(), &input.shape);
        Ok(StepControl::Continue)
      }
      None => Ok(StepControl::Done),
    }
  }
}
