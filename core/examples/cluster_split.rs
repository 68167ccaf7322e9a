// stepflow/examples/cluster_split.rs
//
// Splits a graph over one master and two slaves, then runs every node
// in this process. All nodes live on 127.0.0.1, so the socket steps talk
// over localhost.

use std::sync::Arc;
use stepflow::steps::{DUMMY, GENERATE_ROWS};
use stepflow::{
  run_cluster, ClusterSchema, ClusterSplitter, EngineConfig, LocalClusterExecutor, NodeIdentity, PipelineGraph,
  StepNode, StepRegistry, StepflowError,
};
use tracing::info;

fn main() -> Result<(), StepflowError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  let schema = ClusterSchema::new("local", NodeIdentity::new("master", "127.0.0.1"))
    .with_base_port(46_000)
    .with_slave(NodeIdentity::new("slave-a", "127.0.0.1"))
    .with_slave(NodeIdentity::new("slave-b", "127.0.0.1"));

  let mut graph = PipelineGraph::new("cluster demo");
  graph.add_cluster_schema(schema);
  graph
    .add_step(StepNode::new("generate", GENERATE_ROWS).with_setting("limit", 1_000))?
    .add_step(StepNode::new("work", DUMMY).with_cluster_schema("local"))?
    .add_step(StepNode::new("gather", DUMMY))?;
  graph.add_hop("generate", "work")?;
  graph.add_hop("work", "gather")?;

  let config = EngineConfig::default();
  let split = ClusterSplitter::new(&config).split(&graph)?;
  for node_graph in split.graphs() {
    let steps: Vec<&str> = node_graph.graph.steps.iter().map(|s| s.name.as_str()).collect();
    info!("{} on {}: {:?}", node_graph.graph.name, node_graph.node.hostname, steps);
  }
  for pair in &split.socket_pairs {
    info!(
      "port {}: {}/{} -> {}/{}",
      pair.port, pair.source_node, pair.source_step, pair.target_node, pair.target_step
    );
  }

  let executor = LocalClusterExecutor::new(Arc::new(StepRegistry::with_builtins()), config);
  let result = run_cluster(&executor, &split);
  for node in result.nodes() {
    match &node.result {
      Ok(run) => info!(
        "{}: {:?}, read {}, written {}",
        node.graph_name, run.outcome, run.lines_read, run.lines_written
      ),
      Err(e) => info!("{}: did not start: {}", node.graph_name, e),
    }
  }
  info!("Cluster success: {}, errors: {}", result.is_success(), result.total_errors());
  Ok(())
}
