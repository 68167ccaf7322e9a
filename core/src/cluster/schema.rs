// stepflow/src/cluster/schema.rs

use crate::error::{StepflowError, StepflowResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An execution node of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
  pub name: String,
  /// Address other nodes use to reach this one.
  pub hostname: String,
}

impl NodeIdentity {
  pub fn new(name: impl Into<String>, hostname: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      hostname: hostname.into(),
    }
  }
}

/// One master and an ordered list of slaves that clustered steps run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSchema {
  pub name: String,
  pub master: NodeIdentity,
  #[serde(default)]
  pub slaves: Vec<NodeIdentity>,
  /// First port handed out to socket pairs; the engine default otherwise.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub base_port: Option<u16>,
  /// Buffer size in bytes of the socket streams between nodes.
  #[serde(default = "default_socket_buffer_size")]
  pub socket_buffer_size: usize,
}

pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 50_000;

fn default_socket_buffer_size() -> usize {
  DEFAULT_SOCKET_BUFFER_SIZE
}

impl ClusterSchema {
  pub fn new(name: impl Into<String>, master: NodeIdentity) -> Self {
    Self {
      name: name.into(),
      master,
      slaves: Vec::new(),
      base_port: None,
      socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
    }
  }

  pub fn with_slave(mut self, slave: NodeIdentity) -> Self {
    self.slaves.push(slave);
    self
  }

  pub fn with_base_port(mut self, port: u16) -> Self {
    self.base_port = Some(port);
    self
  }

  /// Rejects schemas without slaves or with duplicate node names.
  pub fn validate(&self) -> StepflowResult<()> {
    if self.slaves.is_empty() {
      return Err(StepflowError::InvalidClusterSchema {
        schema: self.name.clone(),
        message: "a cluster schema needs at least one slave".to_string(),
      });
    }
    let mut seen = HashSet::new();
    for node in std::iter::once(&self.master).chain(self.slaves.iter()) {
      if !seen.insert(node.name.as_str()) {
        return Err(StepflowError::InvalidClusterSchema {
          schema: self.name.clone(),
          message: format!("node name '{}' is used more than once", node.name),
        });
      }
    }
    Ok(())
  }
}
