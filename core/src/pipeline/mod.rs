// stepflow/src/pipeline/mod.rs

//! Defines the `PipelineGraph`, its validation into an execution plan, and
//! the `Coordinator` that runs it.

pub mod definition;
pub mod execution;
pub mod result;
pub mod topology;

pub use definition::{ConnectionDef, Distribution, GraphRole, HopEdge, HopGroup, PipelineGraph, StepNode};
pub use execution::{Coordinator, CoordinatorState};
pub use result::{PipelineOutcome, PipelineResult};
pub use topology::{DispatchKind, ExecutionPlan, HopPlan};
