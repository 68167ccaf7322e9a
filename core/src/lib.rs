// src/lib.rs

//! Stepflow: a multi-threaded row-streaming pipeline engine for Rust.
//!
//! Stepflow runs a graph of steps connected by bounded row queues, with
//! features like:
//!  - One OS thread per step copy, with backpressure through bounded queues.
//!  - Running a step in several copies, with round-robin, keyed or mirrored
//!    partitioning of rows between copies.
//!  - Row shapes (field metadata) with case-insensitive lookup and
//!    copy-on-write snapshots safe to share across threads.
//!  - Error hops: failed rows are routed with error details instead of
//!    stopping the pipeline, up to configurable thresholds.
//!  - Cooperative stop, pause and resume.
//!  - Splitting a graph over a cluster of one master and several slaves,
//!    joined by socket writer/reader steps.

pub mod cluster;
pub mod config;
pub mod core;
pub mod error;
pub mod partition;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod row;
pub mod step;
pub mod steps;

// --- Re-exports for the Public API ---

// Row model
pub use crate::row::{Decimal, Row, RowShape, ShapeSnapshot, Value, ValueDescriptor, ValueType};

// What step implementations work with
pub use crate::core::context::StepContext;
pub use crate::core::control::{StepControl, StopHandle};
pub use crate::core::step::{InputRow, RowEmitter, RowError, StepLogic};

// Graph definition and execution
pub use crate::pipeline::definition::{ConnectionDef, Distribution, GraphRole, HopEdge, HopGroup, PipelineGraph, StepNode};
pub use crate::pipeline::execution::{Coordinator, CoordinatorState};
pub use crate::pipeline::result::{PipelineOutcome, PipelineResult};
pub use crate::step::error_handling::ErrorHandling;
pub use crate::step::status::{StepReport, StepStatus};

pub use crate::partition::{PartitionAssignment, PartitionMethod, PartitionRouter};
pub use crate::queue::{QueueId, QueueRead, RowQueue};

// Cluster
pub use crate::cluster::{
  run_cluster, ClusterRunResult, ClusterSchema, ClusterSplitter, LocalClusterExecutor, NodeIdentity,
  RemoteExecutor, SocketPair, SplitResult,
};

pub use crate::config::EngineConfig;
pub use crate::error::{StepflowError, StepflowResult};
pub use crate::registry::{StepFactory, StepRegistry};

/*
    Core Workflow:
    1. Build a `PipelineGraph`: add `StepNode`s (name, step type, copies,
       partitioning, error handling) and connect them with hops.
    2. Create a `StepRegistry` (`with_builtins()` for the bundled steps) and
       register a factory for every custom step type.
    3. Create a `Coordinator` with the graph, registry and an `EngineConfig`,
       then `execute()` it (or `prepare()`, `start()`, `wait_until_finished()`).
    4. For a cluster: assign steps to a `ClusterSchema`, call
       `ClusterSplitter::split`, and hand each sub-graph to a `RemoteExecutor`
       (`run_cluster` with `LocalClusterExecutor` runs them all in-process).
*/
