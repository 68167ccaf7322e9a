// stepflow/src/pipeline/definition.rs

//! Contains the `PipelineGraph` definition: step nodes, hops, shared
//! connections and cluster schemas, plus methods for its construction and
//! structural modification.
//!
//! The graph is plain data. It can be built in code, loaded from JSON, and
//! is what the cluster splitter consumes and produces.

use crate::cluster::schema::ClusterSchema;
use crate::config::EngineConfig;
use crate::error::{StepflowError, StepflowResult};
use crate::partition::PartitionAssignment;
use crate::step::error_handling::ErrorHandling;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn one() -> usize {
  1
}

fn enabled() -> bool {
  true
}

/// How a step spreads its rows over its outgoing hops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Distribution {
  /// Each row goes to exactly one hop, rotating.
  #[default]
  RoundRobin,
  /// Every hop receives every row.
  Copy,
  /// Each row goes to the hop chosen by hashing `field`.
  Keyed { field: String },
}

/// A named shared resource declaration (database, endpoint, ...).
/// Only carried through the graph; steps interpret the properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDef {
  pub name: String,
  #[serde(default)]
  pub properties: BTreeMap<String, String>,
}

impl ConnectionDef {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      properties: BTreeMap::new(),
    }
  }

  pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.properties.insert(key.into(), value.into());
    self
  }
}

/// One step of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepNode {
  pub name: String,
  /// Key into the step registry.
  pub step_type: String,
  #[serde(default = "one")]
  pub copies: usize,
  #[serde(default)]
  pub partitioning: PartitionAssignment,
  /// Name of the cluster schema this step runs on, if clustered.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cluster_schema: Option<String>,
  #[serde(default)]
  pub distribution: Distribution,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_handling: Option<ErrorHandling>,
  /// Names of the connections this step uses.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub connections: Vec<String>,
  /// Free-form settings interpreted by the step type.
  #[serde(default)]
  pub settings: BTreeMap<String, String>,
}

impl StepNode {
  pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      step_type: step_type.into(),
      copies: 1,
      partitioning: PartitionAssignment::none(),
      cluster_schema: None,
      distribution: Distribution::default(),
      error_handling: None,
      connections: Vec::new(),
      settings: BTreeMap::new(),
    }
  }

  pub fn with_copies(mut self, copies: usize) -> Self {
    self.copies = copies;
    self
  }

  pub fn with_partitioning(mut self, partitioning: PartitionAssignment) -> Self {
    self.partitioning = partitioning;
    self
  }

  pub fn with_cluster_schema(mut self, schema: impl Into<String>) -> Self {
    self.cluster_schema = Some(schema.into());
    self
  }

  pub fn with_distribution(mut self, distribution: Distribution) -> Self {
    self.distribution = distribution;
    self
  }

  pub fn with_error_handling(mut self, error_handling: ErrorHandling) -> Self {
    self.error_handling = Some(error_handling);
    self
  }

  pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
    self.connections.push(connection.into());
    self
  }

  pub fn with_setting(mut self, key: impl Into<String>, value: impl ToString) -> Self {
    self.settings.insert(key.into(), value.to_string());
    self
  }

  pub fn setting(&self, key: &str) -> Option<&str> {
    self.settings.get(key).map(String::as_str)
  }

  pub fn is_clustered(&self) -> bool {
    self.cluster_schema.is_some()
  }

  pub fn is_partitioned(&self) -> bool {
    self.partitioning.is_partitioned()
  }
}

/// Marks hops that stand in for one logical hop, such as the per-slave
/// writer hops a cluster split creates. The source's [`Distribution`]
/// treats a group as a single hop; `distribution` then picks among its
/// members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopGroup {
  /// The step the logical hop leads to.
  pub target: String,
  #[serde(default)]
  pub distribution: Distribution,
}

impl HopGroup {
  pub fn new(target: impl Into<String>, distribution: Distribution) -> Self {
    Self {
      target: target.into(),
      distribution,
    }
  }
}

/// A directed connection between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopEdge {
  pub from: String,
  pub to: String,
  #[serde(default = "enabled")]
  pub enabled: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub group: Option<HopGroup>,
}

impl HopEdge {
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      enabled: true,
      group: None,
    }
  }

  pub fn with_group(mut self, group: HopGroup) -> Self {
    self.group = Some(group);
    self
  }
}

/// What produced a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphRole {
  /// Written by hand, possibly still containing clustered steps.
  #[default]
  Standalone,
  /// Master part of a split graph.
  Master,
  /// Slave part of a split graph.
  Slave,
}

/// The pipeline definition: steps connected by hops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineGraph {
  pub name: String,
  #[serde(default)]
  pub steps: Vec<StepNode>,
  #[serde(default)]
  pub hops: Vec<HopEdge>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub connections: Vec<ConnectionDef>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub cluster_schemas: Vec<ClusterSchema>,
  /// Overrides the engine's row-set (queue) capacity for this graph.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub row_set_size: Option<usize>,
  #[serde(default)]
  pub role: GraphRole,
}

impl PipelineGraph {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn from_json(json: &str) -> StepflowResult<Self> {
    serde_json::from_str(json).map_err(|e| StepflowError::InvalidGraph {
      message: format!("cannot parse graph JSON: {e}"),
    })
  }

  pub fn to_json(&self) -> StepflowResult<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  fn ensure_step_exists(&self, step_name: &str) -> StepflowResult<()> {
    if self.find_step(step_name).is_none() {
      return Err(StepflowError::UnknownStep {
        step_name: step_name.to_string(),
      });
    }
    Ok(())
  }

  fn ensure_step_not_exists(&self, step_name: &str) -> StepflowResult<()> {
    if self.find_step(step_name).is_some() {
      return Err(StepflowError::InvalidGraph {
        message: format!("step '{step_name}' already exists"),
      });
    }
    Ok(())
  }

  // --- Basic Step Manipulation Methods ---

  pub fn add_step(&mut self, step: StepNode) -> StepflowResult<&mut Self> {
    self.ensure_step_not_exists(&step.name)?;
    self.steps.push(step);
    Ok(self)
  }

  /// Adds an enabled hop. Both steps must already exist.
  pub fn add_hop(&mut self, from: &str, to: &str) -> StepflowResult<&mut Self> {
    self.ensure_step_exists(from)?;
    self.ensure_step_exists(to)?;
    if self.hops.iter().any(|h| h.from == from && h.to == to) {
      return Err(StepflowError::InvalidGraph {
        message: format!("hop '{from}' -> '{to}' already exists"),
      });
    }
    self.hops.push(HopEdge::new(from, to));
    Ok(self)
  }

  /// Enables or disables an existing hop. Disabled hops are ignored at run time.
  pub fn set_hop_enabled(&mut self, from: &str, to: &str, enabled: bool) -> StepflowResult<()> {
    let hop = self
      .hops
      .iter_mut()
      .find(|h| h.from == from && h.to == to)
      .ok_or_else(|| StepflowError::InvalidGraph {
        message: format!("no hop '{from}' -> '{to}'"),
      })?;
    hop.enabled = enabled;
    Ok(())
  }

  /// Removes a step together with every hop touching it.
  pub fn remove_step(&mut self, step_name: &str) -> Option<StepNode> {
    let idx = self.steps.iter().position(|s| s.name == step_name)?;
    self.hops.retain(|h| h.from != step_name && h.to != step_name);
    Some(self.steps.remove(idx))
  }

  pub fn add_connection(&mut self, connection: ConnectionDef) -> &mut Self {
    self.connections.retain(|c| c.name != connection.name);
    self.connections.push(connection);
    self
  }

  pub fn add_cluster_schema(&mut self, schema: ClusterSchema) -> &mut Self {
    self.cluster_schemas.retain(|s| s.name != schema.name);
    self.cluster_schemas.push(schema);
    self
  }

  pub fn with_row_set_size(mut self, size: usize) -> Self {
    self.row_set_size = Some(size);
    self
  }

  // --- Lookups ---

  pub fn find_step(&self, step_name: &str) -> Option<&StepNode> {
    self.steps.iter().find(|s| s.name == step_name)
  }

  pub fn find_step_mut(&mut self, step_name: &str) -> Option<&mut StepNode> {
    self.steps.iter_mut().find(|s| s.name == step_name)
  }

  pub fn find_connection(&self, name: &str) -> Option<&ConnectionDef> {
    self.connections.iter().find(|c| c.name == name)
  }

  pub fn find_cluster_schema(&self, name: &str) -> Option<&ClusterSchema> {
    self.cluster_schemas.iter().find(|s| s.name == name)
  }

  pub fn enabled_hops(&self) -> impl Iterator<Item = &HopEdge> {
    self.hops.iter().filter(|h| h.enabled)
  }

  /// Steps feeding `step_name` over enabled hops, in hop order.
  pub fn previous_steps(&self, step_name: &str) -> Vec<&StepNode> {
    self
      .enabled_hops()
      .filter(|h| h.to == step_name)
      .filter_map(|h| self.find_step(&h.from))
      .collect()
  }

  /// Steps fed by `step_name` over enabled hops, in hop order.
  pub fn next_steps(&self, step_name: &str) -> Vec<&StepNode> {
    self
      .enabled_hops()
      .filter(|h| h.from == step_name)
      .filter_map(|h| self.find_step(&h.to))
      .collect()
  }

  /// True if any step is assigned to a cluster schema.
  pub fn is_clustered(&self) -> bool {
    self.steps.iter().any(StepNode::is_clustered)
  }

  /// Capacity used for every queue of this graph.
  pub fn effective_row_set_size(&self, config: &EngineConfig) -> usize {
    self.row_set_size.unwrap_or(config.row_set_size).max(1)
  }
}
