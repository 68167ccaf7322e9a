// stepflow/src/cluster/splitter.rs

//! Rewrites one pipeline graph into a master graph plus one graph per slave
//! of its cluster schema, joined by socket writer/reader step pairs.
//!
//! Splitting is pure graph surgery: no sockets are opened and no step logic
//! is built.

use super::schema::{ClusterSchema, NodeIdentity};
use super::socket::{
  SETTING_BIND_ADDRESS, SETTING_BUFFER_SIZE, SETTING_HOSTNAME, SETTING_PORT, SOCKET_READER, SOCKET_WRITER,
};
use crate::config::EngineConfig;
use crate::error::{StepflowError, StepflowResult};
use crate::partition::PartitionMethod;
use crate::pipeline::definition::{Distribution, GraphRole, HopEdge, HopGroup, PipelineGraph, StepNode};
use crate::pipeline::topology;
use std::collections::{BTreeSet, HashMap};
use tracing::{event, instrument, Level};

/// One socket connection between two nodes, carrying one hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketPair {
  pub port: u16,
  pub source_node: String,
  pub source_step: String,
  pub target_node: String,
  pub target_step: String,
  /// Name of the writer step in the source node's graph.
  pub writer_step: String,
  /// Name of the reader step in the target node's graph.
  pub reader_step: String,
}

/// A graph together with the node it must run on.
#[derive(Debug, Clone)]
pub struct NodeGraph {
  pub node: NodeIdentity,
  pub graph: PipelineGraph,
}

#[derive(Debug, Clone)]
pub struct SplitResult {
  pub schema: String,
  pub master: NodeGraph,
  /// In the schema's slave order.
  pub slaves: Vec<NodeGraph>,
  /// In allocation order: hop order, then slave order.
  pub socket_pairs: Vec<SocketPair>,
}

impl SplitResult {
  /// Master first, then every slave.
  pub fn graphs(&self) -> impl Iterator<Item = &NodeGraph> {
    std::iter::once(&self.master).chain(self.slaves.iter())
  }

  pub fn graph_for(&self, node_name: &str) -> Option<&PipelineGraph> {
    self.graphs().find(|g| g.node.name == node_name).map(|g| &g.graph)
  }

  pub fn graph_for_mut(&mut self, node_name: &str) -> Option<&mut PipelineGraph> {
    if self.master.node.name == node_name {
      return Some(&mut self.master.graph);
    }
    self
      .slaves
      .iter_mut()
      .find(|g| g.node.name == node_name)
      .map(|g| &mut g.graph)
  }

  pub fn total_step_count(&self) -> usize {
    self.graphs().map(|g| g.graph.steps.len()).sum()
  }

  pub fn pairs_for_hop(&self, source_step: &str, target_step: &str) -> Vec<&SocketPair> {
    self
      .socket_pairs
      .iter()
      .filter(|p| p.source_step == source_step && p.target_step == target_step)
      .collect()
  }
}

/// Hands out ports from the schema's base port; asking twice for the same
/// `(source node, source step, target node, target step)` yields the same port.
struct PortAllocator {
  schema: String,
  base: u16,
  allocated: u32,
  cache: HashMap<(String, String, String, String), u16>,
}

impl PortAllocator {
  fn new(schema: &str, base: u16) -> Self {
    Self {
      schema: schema.to_string(),
      base,
      allocated: 0,
      cache: HashMap::new(),
    }
  }

  fn port(&mut self, source_node: &str, source_step: &str, target_node: &str, target_step: &str) -> StepflowResult<u16> {
    let key = (
      source_node.to_string(),
      source_step.to_string(),
      target_node.to_string(),
      target_step.to_string(),
    );
    if let Some(port) = self.cache.get(&key) {
      return Ok(*port);
    }
    let port = u16::try_from(u32::from(self.base) + self.allocated).map_err(|_| StepflowError::InvalidClusterSchema {
      schema: self.schema.clone(),
      message: format!("ran out of ports above base port {}", self.base),
    })?;
    self.allocated += 1;
    self.cache.insert(key, port);
    Ok(port)
  }
}

pub struct ClusterSplitter {
  default_base_port: u16,
}

impl ClusterSplitter {
  pub fn new(config: &EngineConfig) -> Self {
    Self {
      default_base_port: config.base_port,
    }
  }

  #[instrument(name = "ClusterSplitter::split", skip_all, fields(pipeline = %graph.name), err(Display))]
  pub fn split(&self, graph: &PipelineGraph) -> StepflowResult<SplitResult> {
    topology::validate_structure(graph)?;
    let schema = self.used_schema(graph)?;
    let mut ports = PortAllocator::new(&schema.name, schema.base_port.unwrap_or(self.default_base_port));

    let mut master = NodeGraph {
      node: schema.master.clone(),
      graph: sub_graph(graph, format!("{} (master)", graph.name), GraphRole::Master),
    };
    let mut slaves: Vec<NodeGraph> = schema
      .slaves
      .iter()
      .map(|slave| NodeGraph {
        node: slave.clone(),
        graph: sub_graph(graph, format!("{} ({}:{})", graph.name, schema.name, slave.name), GraphRole::Slave),
      })
      .collect();

    for step in &graph.steps {
      if step.is_clustered() {
        for slave in &mut slaves {
          let mut local = step.clone();
          local.cluster_schema = None;
          slave.graph.steps.push(local);
        }
      } else {
        master.graph.steps.push(step.clone());
      }
    }

    let mut pairs = Vec::new();
    for hop in graph.enabled_hops() {
      let (Some(from), Some(to)) = (graph.find_step(&hop.from), graph.find_step(&hop.to)) else {
        return Err(StepflowError::UnknownStep {
          step_name: hop.from.clone(),
        });
      };
      match (from.is_clustered(), to.is_clustered()) {
        (false, false) => master.graph.hops.push(HopEdge::new(&hop.from, &hop.to)),
        (true, true) => {
          for slave in &mut slaves {
            slave.graph.hops.push(HopEdge::new(&hop.from, &hop.to));
          }
        }
        (false, true) => {
          if slaves.len() > 1 && is_error_target(from, &to.name) {
            return Err(StepflowError::ConfigurationError {
              step_name: from.name.clone(),
              message: "an error hop cannot fan out to several slaves".to_string(),
            });
          }
          let group = slave_group(to);
          event!(
            Level::DEBUG,
            step = %from.name,
            target = %to.name,
            distribution = ?group.distribution,
            "Master step feeds the slaves through one hop group."
          );
          for slave in &mut slaves {
            let pair = connect(&mut ports, &schema, (&mut master, from), (slave, to), Some(&group))?;
            pairs.push(pair);
          }
        }
        (true, false) => {
          for slave in &mut slaves {
            let pair = connect(&mut ports, &schema, (slave, from), (&mut master, to), None)?;
            pairs.push(pair);
          }
        }
      }
    }

    for node_graph in std::iter::once(&mut master).chain(slaves.iter_mut()) {
      copy_connections(graph, &mut node_graph.graph);
    }

    event!(
      Level::INFO,
      schema = %schema.name,
      slaves = slaves.len(),
      socket_pairs = pairs.len(),
      "Pipeline split across cluster."
    );
    Ok(SplitResult {
      schema: schema.name.clone(),
      master,
      slaves,
      socket_pairs: pairs,
    })
  }

  /// The one cluster schema the graph's steps use.
  fn used_schema<'g>(&self, graph: &'g PipelineGraph) -> StepflowResult<&'g ClusterSchema> {
    let used: BTreeSet<&str> = graph.steps.iter().filter_map(|s| s.cluster_schema.as_deref()).collect();
    let mut names = used.into_iter();
    let name = names.next().ok_or_else(|| StepflowError::InvalidGraph {
      message: format!("graph '{}' has no clustered steps to split", graph.name),
    })?;
    if let Some(other) = names.next() {
      return Err(StepflowError::InvalidClusterSchema {
        schema: name.to_string(),
        message: format!("only one cluster schema may be used per graph, '{other}' is used as well"),
      });
    }
    let schema = graph
      .find_cluster_schema(name)
      .ok_or_else(|| StepflowError::InvalidClusterSchema {
        schema: name.to_string(),
        message: "not defined in the graph".to_string(),
      })?;
    schema.validate()?;
    Ok(schema)
  }
}

fn sub_graph(original: &PipelineGraph, name: String, role: GraphRole) -> PipelineGraph {
  PipelineGraph {
    name,
    row_set_size: original.row_set_size,
    role,
    ..PipelineGraph::default()
  }
}

fn is_error_target(step: &StepNode, target: &str) -> bool {
  step.error_handling.as_ref().is_some_and(|eh| eh.target_step == target)
}

/// Adds a writer after `from` in the source graph and a reader before `to`
/// in the target graph, sharing one allocated port.
fn connect(
  ports: &mut PortAllocator,
  schema: &ClusterSchema,
  (source, from): (&mut NodeGraph, &StepNode),
  (target, to): (&mut NodeGraph, &StepNode),
  group: Option<&HopGroup>,
) -> StepflowResult<SocketPair> {
  let writer_port = ports.port(&source.node.name, &from.name, &target.node.name, &to.name)?;
  let writer = StepNode::new(format!("Writer : {writer_port}"), SOCKET_WRITER)
    .with_setting(SETTING_PORT, writer_port)
    .with_setting(SETTING_HOSTNAME, &source.node.hostname)
    .with_setting(SETTING_BIND_ADDRESS, "0.0.0.0")
    .with_setting(SETTING_BUFFER_SIZE, schema.socket_buffer_size);
  let writer_name = writer.name.clone();
  source.graph.steps.push(writer);
  let mut hop = HopEdge::new(&from.name, &writer_name);
  hop.group = group.cloned();
  source.graph.hops.push(hop);
  if is_error_target(from, &to.name) {
    if let Some(eh) = source
      .graph
      .find_step_mut(&from.name)
      .and_then(|s| s.error_handling.as_mut())
    {
      eh.target_step = writer_name.clone();
    }
  }

  // Asked again from the reading side; the cache keeps both ends on one port.
  let reader_port = ports.port(&source.node.name, &from.name, &target.node.name, &to.name)?;
  let reader = StepNode::new(format!("Reader : {reader_port}"), SOCKET_READER)
    .with_setting(SETTING_PORT, reader_port)
    .with_setting(SETTING_HOSTNAME, &source.node.hostname)
    .with_setting(SETTING_BUFFER_SIZE, schema.socket_buffer_size);
  let reader_name = reader.name.clone();
  target.graph.steps.push(reader);
  target.graph.hops.push(HopEdge::new(&reader_name, &to.name));

  event!(
    Level::DEBUG,
    port = writer_port,
    source_node = %source.node.name,
    source_step = %from.name,
    target_node = %target.node.name,
    target_step = %to.name,
    "Socket pair allocated."
  );
  Ok(SocketPair {
    port: writer_port,
    source_node: source.node.name.clone(),
    source_step: from.name.clone(),
    target_node: target.node.name.clone(),
    target_step: to.name.clone(),
    writer_step: writer_name,
    reader_step: reader_name,
  })
}

/// The writer hops towards one clustered step form a group: rows go to the
/// slave owning their partition (keyed), to every slave (mirror) or
/// round-robin. The master step's own distribution is left alone.
fn slave_group(to: &StepNode) -> HopGroup {
  let distribution = match (&to.partitioning.method, &to.partitioning.key_field) {
    (PartitionMethod::Keyed | PartitionMethod::Modulo, Some(field)) => Distribution::Keyed { field: field.clone() },
    (PartitionMethod::Mirror, _) => Distribution::Copy,
    _ => Distribution::RoundRobin,
  };
  HopGroup::new(&to.name, distribution)
}

/// Copies the connection definitions used by the graph's steps.
fn copy_connections(original: &PipelineGraph, graph: &mut PipelineGraph) {
  let used: BTreeSet<&str> = graph
    .steps
    .iter()
    .flat_map(|s| s.connections.iter().map(String::as_str))
    .collect();
  let copied: Vec<_> = original
    .connections
    .iter()
    .filter(|c| used.contains(c.name.as_str()))
    .cloned()
    .collect();
  graph.connections = copied;
}
