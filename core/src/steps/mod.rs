//! Built-in step types.

pub mod dummy;
pub mod generate_rows;

pub use dummy::DummyStep;
pub use generate_rows::GenerateRowsStep;

use crate::core::step::StepLogic;
use crate::registry::StepRegistry;

pub const DUMMY: &str = "dummy";
pub const GENERATE_ROWS: &str = "generate_rows";

pub(crate) fn register_builtins(registry: &StepRegistry) {
  registry.register_fn(DUMMY, DummyStep::default);
  registry.register(GENERATE_ROWS, |ctx| {
    Ok(Box::new(GenerateRowsStep::from_context(ctx)?) as Box<dyn StepLogic>)
  });
}
