// stepflow/src/registry.rs

//! Defines `StepRegistry`, a name-keyed registry of step factories. The
//! coordinator asks it for one fresh `StepLogic` per step copy.

use crate::core::context::StepContext;
use crate::core::step::StepLogic;
use crate::error::{StepflowError, StepflowResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// Builds the logic of one step copy from its context.
pub type StepFactory = Arc<dyn Fn(&StepContext) -> anyhow::Result<Box<dyn StepLogic>> + Send + Sync>;

/// Maps step type names (the `step_type` of a `StepNode`) to factories.
pub struct StepRegistry {
  factories: RwLock<HashMap<String, StepFactory>>,
}

impl StepRegistry {
  /// Creates a new, empty registry.
  pub fn new() -> Self {
    Self {
      factories: RwLock::new(HashMap::new()),
    }
  }

  /// A registry holding the built-in step types: `dummy`, `generate_rows`,
  /// `socket_writer` and `socket_reader`.
  pub fn with_builtins() -> Self {
    let registry = Self::new();
    crate::steps::register_builtins(&registry);
    crate::cluster::socket::register_socket_steps(&registry);
    registry
  }

  /// Registers (or replaces) the factory for `step_type`.
  pub fn register<F>(&self, step_type: impl Into<String>, factory: F)
  where
    F: Fn(&StepContext) -> anyhow::Result<Box<dyn StepLogic>> + Send + Sync + 'static,
  {
    let step_type = step_type.into();
    event!(Level::DEBUG, step_type = %step_type, "Registering step type.");
    self.factories.write().insert(step_type, Arc::new(factory));
  }

  /// Registers a step type whose logic is built without looking at the context.
  pub fn register_fn<F, L>(&self, step_type: impl Into<String>, make: F)
  where
    F: Fn() -> L + Send + Sync + 'static,
    L: StepLogic + 'static,
  {
    self.register(step_type, move |_ctx: &StepContext| {
      Ok(Box::new(make()) as Box<dyn StepLogic>)
    });
  }

  pub fn contains(&self, step_type: &str) -> bool {
    self.factories.read().contains_key(step_type)
  }

  pub fn step_types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
    types.sort();
    types
  }

  /// Builds the logic for the copy described by `ctx`.
  #[instrument(
    name = "StepRegistry::create",
    skip_all,
    fields(step = %ctx.node.name, step_type = %ctx.node.step_type, copy = ctx.copy),
    err(Display)
  )]
  pub fn create(&self, ctx: &StepContext) -> StepflowResult<Box<dyn StepLogic>> {
    // Clone the factory out so a factory may itself consult the registry.
    let factory = self
      .factories
      .read()
      .get(&ctx.node.step_type)
      .cloned()
      .ok_or_else(|| StepflowError::UnknownStepType {
        step_name: ctx.node.name.clone(),
        step_type: ctx.node.step_type.clone(),
      })?;
    factory(ctx).map_err(|source| StepflowError::InitFailed {
      step_name: ctx.node.name.clone(),
      copy: ctx.copy,
      source,
    })
  }
}

impl Default for StepRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for StepRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepRegistry").field("step_types", &self.step_types()).finish()
  }
}
