// stepflow/src/cluster/executor.rs

//! Hand-off of split graphs to the nodes that run them.

use super::schema::NodeIdentity;
use super::splitter::SplitResult;
use crate::config::EngineConfig;
use crate::error::{StepflowError, StepflowResult};
use crate::pipeline::definition::PipelineGraph;
use crate::pipeline::execution::Coordinator;
use crate::pipeline::result::PipelineResult;
use crate::registry::StepRegistry;
use std::sync::Arc;
use std::thread;
use tracing::{event, instrument, Level};

/// Runs one sub-graph on one node and reports its outcome.
pub trait RemoteExecutor: Send + Sync {
  fn execute(&self, node: &NodeIdentity, graph: &PipelineGraph) -> StepflowResult<PipelineResult>;
}

/// Runs every node's graph in this process, each with its own coordinator
/// and stop flag, as if it were a separate machine.
#[derive(Debug, Clone)]
pub struct LocalClusterExecutor {
  registry: Arc<StepRegistry>,
  config: EngineConfig,
}

impl LocalClusterExecutor {
  pub fn new(registry: Arc<StepRegistry>, config: EngineConfig) -> Self {
    Self { registry, config }
  }
}

impl RemoteExecutor for LocalClusterExecutor {
  #[instrument(name = "LocalClusterExecutor::execute", skip_all, fields(node = %node.name, pipeline = %graph.name), err(Display))]
  fn execute(&self, node: &NodeIdentity, graph: &PipelineGraph) -> StepflowResult<PipelineResult> {
    event!(Level::DEBUG, "Executing sub-graph locally.");
    let mut coordinator = Coordinator::new(graph.clone(), Arc::clone(&self.registry), self.config.clone());
    coordinator.execute()
  }
}

/// Outcome of one node's graph.
#[derive(Debug)]
pub struct NodeOutcome {
  pub node: NodeIdentity,
  pub graph_name: String,
  pub result: StepflowResult<PipelineResult>,
}

impl NodeOutcome {
  pub fn is_success(&self) -> bool {
    matches!(&self.result, Ok(result) if result.is_success())
  }

  /// Fatal errors of the node; a node that never started counts as one.
  pub fn errors(&self) -> u64 {
    match &self.result {
      Ok(result) => result.errors,
      Err(_) => 1,
    }
  }
}

#[derive(Debug)]
pub struct ClusterRunResult {
  pub master: NodeOutcome,
  pub slaves: Vec<NodeOutcome>,
}

impl ClusterRunResult {
  pub fn nodes(&self) -> impl Iterator<Item = &NodeOutcome> {
    std::iter::once(&self.master).chain(self.slaves.iter())
  }

  pub fn is_success(&self) -> bool {
    self.nodes().all(NodeOutcome::is_success)
  }

  pub fn total_errors(&self) -> u64 {
    self.nodes().map(NodeOutcome::errors).sum()
  }
}

/// Executes every graph of `split` concurrently (one thread per node) and
/// waits for all of them.
#[instrument(name = "run_cluster", skip_all, fields(schema = %split.schema, nodes = 1 + split.slaves.len()))]
pub fn run_cluster(executor: &dyn RemoteExecutor, split: &SplitResult) -> ClusterRunResult {
  let mut outcomes: Vec<NodeOutcome> = thread::scope(|scope| {
    let pending: Vec<_> = split
      .graphs()
      .map(|node_graph| {
        let spawned = thread::Builder::new()
          .name(format!("node:{}", node_graph.node.name))
          .spawn_scoped(scope, move || executor.execute(&node_graph.node, &node_graph.graph));
        (node_graph, spawned)
      })
      .collect();

    pending
      .into_iter()
      .map(|(node_graph, spawned)| {
        let result = match spawned {
          Ok(handle) => handle
            .join()
            .unwrap_or_else(|_| Err(StepflowError::Internal(format!("node '{}' panicked", node_graph.node.name)))),
          Err(e) => Err(StepflowError::Io(e)),
        };
        NodeOutcome {
          node: node_graph.node.clone(),
          graph_name: node_graph.graph.name.clone(),
          result,
        }
      })
      .collect()
  });

  let master = outcomes.remove(0);
  event!(
    Level::INFO,
    errors = outcomes.iter().map(NodeOutcome::errors).sum::<u64>() + master.errors(),
    "Cluster run finished."
  );
  ClusterRunResult { master, slaves: outcomes }
}
