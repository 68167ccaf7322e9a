// stepflow/src/pipeline/topology.rs

//! Structural validation of a `PipelineGraph` and the execution plan derived
//! from it: a topological step order plus, for every enabled hop, how many
//! queues connect which copies and how rows choose among them.

use super::definition::{Distribution, HopGroup, PipelineGraph, StepNode};
use crate::error::{StepflowError, StepflowResult};
use crate::registry::StepRegistry;
use crate::step::output::HopRouting;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{event, Level};

/// Queue layout of one hop, by source and target copy counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
  /// 1 copy to 1 copy: one queue.
  OneToOne,
  /// 1 copy to N copies: N queues.
  OneToMany,
  /// N copies to 1 copy: N queues.
  ManyToOne,
  /// N copies to N copies without repartitioning: copy i feeds copy i.
  Paired,
  /// Every source copy feeds every target copy.
  Mesh,
}

#[derive(Debug, Clone)]
pub struct HopPlan {
  pub from: String,
  pub to: String,
  pub source_copies: usize,
  pub target_copies: usize,
  pub dispatch: DispatchKind,
  pub routing: HopRouting,
  pub group: Option<HopGroup>,
}

impl HopPlan {
  /// `(source copy, target copy)` of every queue of the hop.
  pub fn queue_pairs(&self) -> Vec<(usize, usize)> {
    match self.dispatch {
      DispatchKind::OneToOne => vec![(0, 0)],
      DispatchKind::OneToMany => (0..self.target_copies).map(|t| (0, t)).collect(),
      DispatchKind::ManyToOne => (0..self.source_copies).map(|s| (s, 0)).collect(),
      DispatchKind::Paired => (0..self.source_copies).map(|c| (c, c)).collect(),
      DispatchKind::Mesh => (0..self.source_copies)
        .flat_map(|s| (0..self.target_copies).map(move |t| (s, t)))
        .collect(),
    }
  }

  pub fn queue_count(&self) -> usize {
    match self.dispatch {
      DispatchKind::OneToOne => 1,
      DispatchKind::OneToMany => self.target_copies,
      DispatchKind::ManyToOne | DispatchKind::Paired => self.source_copies,
      DispatchKind::Mesh => self.source_copies * self.target_copies,
    }
  }
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
  /// Step names, every step after all of its predecessors.
  pub order: Vec<String>,
  pub hops: Vec<HopPlan>,
}

impl ExecutionPlan {
  pub fn hop(&self, from: &str, to: &str) -> Option<&HopPlan> {
    self.hops.iter().find(|h| h.from == from && h.to == to)
  }
}

/// Derives the queue layout of a hop.
///
/// Rows are repartitioned when the target is partitioned differently from
/// the source; repartitioning never pairs copies directly.
pub fn plan_hop(from: &StepNode, to: &StepNode) -> HopPlan {
  let repartition = to.is_partitioned() && from.partitioning != to.partitioning;
  let (s, t) = (from.copies, to.copies);
  let dispatch = match (s, t) {
    (1, 1) => DispatchKind::OneToOne,
    (1, _) => DispatchKind::OneToMany,
    (_, 1) => DispatchKind::ManyToOne,
    _ if s == t && !repartition => DispatchKind::Paired,
    _ => DispatchKind::Mesh,
  };
  let routing = match dispatch {
    DispatchKind::OneToOne | DispatchKind::ManyToOne | DispatchKind::Paired => HopRouting::Direct,
    DispatchKind::OneToMany | DispatchKind::Mesh if repartition => HopRouting::Partitioned(to.partitioning.clone()),
    DispatchKind::OneToMany | DispatchKind::Mesh => HopRouting::RoundRobin,
  };
  HopPlan {
    from: from.name.clone(),
    to: to.name.clone(),
    source_copies: s,
    target_copies: t,
    dispatch,
    routing,
    group: None,
  }
}

/// Checks everything that does not need the step registry and returns the
/// topological order of the steps.
pub fn validate_structure(graph: &PipelineGraph) -> StepflowResult<Vec<String>> {
  if graph.steps.is_empty() {
    return Err(StepflowError::InvalidGraph {
      message: format!("graph '{}' has no steps", graph.name),
    });
  }

  let mut names = HashSet::new();
  for step in &graph.steps {
    if step.name.trim().is_empty() {
      return Err(StepflowError::InvalidGraph {
        message: "step names must not be empty".to_string(),
      });
    }
    if !names.insert(step.name.as_str()) {
      return Err(StepflowError::InvalidGraph {
        message: format!("duplicate step name '{}'", step.name),
      });
    }
    if step.copies == 0 {
      return Err(StepflowError::ConfigurationError {
        step_name: step.name.clone(),
        message: "copies must be at least 1".to_string(),
      });
    }
    step.partitioning.validate(&step.name)?;
    if let Distribution::Keyed { field } = &step.distribution {
      if field.is_empty() {
        return Err(StepflowError::ConfigurationError {
          step_name: step.name.clone(),
          message: "keyed distribution requires a field".to_string(),
        });
      }
    }
    if let Some(schema) = &step.cluster_schema {
      if graph.find_cluster_schema(schema).is_none() {
        return Err(StepflowError::InvalidClusterSchema {
          schema: schema.clone(),
          message: format!("referenced by step '{}' but not defined in the graph", step.name),
        });
      }
    }
    for connection in &step.connections {
      if graph.find_connection(connection).is_none() {
        return Err(StepflowError::ConfigurationError {
          step_name: step.name.clone(),
          message: format!("unknown connection '{connection}'"),
        });
      }
    }
  }

  let mut seen_hops = HashSet::new();
  for hop in &graph.hops {
    for end in [&hop.from, &hop.to] {
      if !names.contains(end.as_str()) {
        return Err(StepflowError::UnknownStep { step_name: end.clone() });
      }
    }
    if hop.enabled && !seen_hops.insert((hop.from.as_str(), hop.to.as_str())) {
      return Err(StepflowError::InvalidGraph {
        message: format!("duplicate hop '{}' -> '{}'", hop.from, hop.to),
      });
    }
    if let Some(HopGroup {
      distribution: Distribution::Keyed { field },
      ..
    }) = &hop.group
    {
      if field.is_empty() {
        return Err(StepflowError::ConfigurationError {
          step_name: hop.from.clone(),
          message: format!("keyed hop group towards '{}' requires a field", hop.to),
        });
      }
    }
  }

  for step in &graph.steps {
    if let Some(handling) = &step.error_handling {
      if !seen_hops.contains(&(step.name.as_str(), handling.target_step.as_str())) {
        return Err(StepflowError::ConfigurationError {
          step_name: step.name.clone(),
          message: format!(
            "error target '{}' must be connected by an enabled hop",
            handling.target_step
          ),
        });
      }
    }
  }

  topological_order(graph)
}

/// Kahn's algorithm over enabled hops; ties keep graph declaration order.
fn topological_order(graph: &PipelineGraph) -> StepflowResult<Vec<String>> {
  let mut in_degree: HashMap<&str, usize> = graph.steps.iter().map(|s| (s.name.as_str(), 0)).collect();
  let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
  for hop in graph.enabled_hops() {
    *in_degree.entry(hop.to.as_str()).or_insert(0) += 1;
    successors.entry(hop.from.as_str()).or_default().push(hop.to.as_str());
  }

  let mut ready: VecDeque<&str> = graph
    .steps
    .iter()
    .map(|s| s.name.as_str())
    .filter(|name| in_degree.get(name) == Some(&0))
    .collect();
  let mut order = Vec::with_capacity(graph.steps.len());

  while let Some(name) = ready.pop_front() {
    order.push(name.to_string());
    for &next in successors.get(name).map(Vec::as_slice).unwrap_or_default() {
      if let Some(degree) = in_degree.get_mut(next) {
        *degree -= 1;
        if *degree == 0 {
          ready.push_back(next);
        }
      }
    }
  }

  if order.len() != graph.steps.len() {
    let mut steps: Vec<String> = in_degree
      .into_iter()
      .filter(|(_, degree)| *degree > 0)
      .map(|(name, _)| name.to_string())
      .collect();
    steps.sort();
    return Err(StepflowError::CycleDetected { steps });
  }
  Ok(order)
}

/// Full validation against a registry, producing the execution plan.
pub fn plan(graph: &PipelineGraph, registry: &StepRegistry) -> StepflowResult<ExecutionPlan> {
  let order = validate_structure(graph)?;

  for step in &graph.steps {
    if !registry.contains(&step.step_type) {
      return Err(StepflowError::UnknownStepType {
        step_name: step.name.clone(),
        step_type: step.step_type.clone(),
      });
    }
  }
  if graph.is_clustered() {
    event!(
      Level::DEBUG,
      graph = %graph.name,
      "Graph has clustered steps; running it locally ignores the cluster assignment."
    );
  }

  let mut hops = Vec::new();
  for hop in graph.enabled_hops() {
    // validate_structure guarantees both ends exist.
    let (Some(from), Some(to)) = (graph.find_step(&hop.from), graph.find_step(&hop.to)) else {
      return Err(StepflowError::UnknownStep {
        step_name: hop.from.clone(),
      });
    };
    let mut hop_plan = plan_hop(from, to);
    hop_plan.group = hop.group.clone();
    event!(
      Level::TRACE,
      from = %hop_plan.from,
      to = %hop_plan.to,
      dispatch = ?hop_plan.dispatch,
      queues = hop_plan.queue_count(),
      "Planned hop."
    );
    hops.push(hop_plan);
  }

  Ok(ExecutionPlan { order, hops })
}
