pub mod context;
pub mod control;
pub mod step;

// Re-export key types for easier access from other stepflow modules (and lib.rs)
pub use context::StepContext;
pub use control::{PipelineSignals, StepControl, StopHandle};
pub use step::{InputRow, RowEmitter, RowError, StepLogic};
