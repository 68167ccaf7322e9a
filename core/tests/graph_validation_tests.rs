// tests/graph_validation_tests.rs

mod common;

use common::*;
use stepflow::pipeline::topology::{self, plan_hop, DispatchKind};
use stepflow::step::output::HopRouting;
use stepflow::{
  ClusterSchema, ConnectionDef, Distribution, ErrorHandling, GraphRole, HopGroup, NodeIdentity, PartitionAssignment,
  PipelineGraph, StepNode, StepflowError,
};

fn chain(steps: &[(&str, &str)]) -> PipelineGraph {
  let mut graph = PipelineGraph::new("chain");
  for (name, step_type) in steps {
    graph.add_step(StepNode::new(*name, *step_type)).unwrap();
  }
  for pair in steps.windows(2) {
    graph.add_hop(pair[0].0, pair[1].0).unwrap();
  }
  graph
}

#[test]
fn topological_order_follows_hops() {
  setup_tracing();
  let mut graph = PipelineGraph::new("diamond");
  for name in ["sink", "left", "right", "source"] {
    graph.add_step(StepNode::new(name, "dummy")).unwrap();
  }
  graph.add_hop("source", "left").unwrap();
  graph.add_hop("source", "right").unwrap();
  graph.add_hop("left", "sink").unwrap();
  graph.add_hop("right", "sink").unwrap();

  let order = topology::validate_structure(&graph).unwrap();
  let pos = |name: &str| order.iter().position(|s| s == name).unwrap();
  assert_eq!(order.len(), 4);
  assert!(pos("source") < pos("left"));
  assert!(pos("source") < pos("right"));
  assert!(pos("left") < pos("sink"));
  assert!(pos("right") < pos("sink"));
}

#[test]
fn cycles_are_reported_with_their_steps() {
  setup_tracing();
  let mut graph = chain(&[("a", "dummy"), ("b", "dummy"), ("c", "dummy")]);
  graph.add_step(StepNode::new("outside", "dummy")).unwrap();
  graph.add_hop("c", "b").unwrap();

  match topology::validate_structure(&graph) {
    Err(StepflowError::CycleDetected { steps }) => assert_eq!(steps, vec!["b", "c"]),
    other => panic!("expected a cycle, got {other:?}"),
  }

  // Disabling one hop of the loop breaks it.
  graph.set_hop_enabled("c", "b", false).unwrap();
  assert!(topology::validate_structure(&graph).is_ok());
}

#[test]
fn builder_rejects_duplicates_and_unknown_ends() {
  setup_tracing();
  let mut graph = chain(&[("a", "dummy"), ("b", "dummy")]);
  assert!(matches!(
    graph.add_step(StepNode::new("a", "dummy")),
    Err(StepflowError::InvalidGraph { .. })
  ));
  assert!(matches!(graph.add_hop("a", "b"), Err(StepflowError::InvalidGraph { .. })));
  assert!(matches!(
    graph.add_hop("a", "nowhere"),
    Err(StepflowError::UnknownStep { ref step_name }) if step_name == "nowhere"
  ));
}

#[test]
fn hand_edited_graphs_are_validated_too() {
  setup_tracing();
  let mut graph = chain(&[("a", "dummy"), ("b", "dummy")]);
  graph.steps.push(StepNode::new("a", "dummy"));
  assert!(matches!(
    topology::validate_structure(&graph),
    Err(StepflowError::InvalidGraph { .. })
  ));

  let mut graph = chain(&[("a", "dummy"), ("b", "dummy")]);
  graph.hops.push(stepflow::HopEdge::new("b", "ghost"));
  assert!(matches!(
    topology::validate_structure(&graph),
    Err(StepflowError::UnknownStep { .. })
  ));

  let mut graph = chain(&[("a", "dummy"), ("b", "dummy")]);
  graph.find_step_mut("b").unwrap().copies = 0;
  assert!(matches!(
    topology::validate_structure(&graph),
    Err(StepflowError::ConfigurationError { .. })
  ));

  assert!(matches!(
    topology::validate_structure(&PipelineGraph::new("nothing")),
    Err(StepflowError::InvalidGraph { .. })
  ));
}

#[test]
fn settings_that_need_a_field_must_name_one() {
  setup_tracing();
  let mut graph = chain(&[("a", "dummy"), ("b", "dummy")]);
  graph.find_step_mut("b").unwrap().partitioning = PartitionAssignment::keyed("");
  assert!(matches!(
    topology::validate_structure(&graph),
    Err(StepflowError::ConfigurationError { ref step_name, .. }) if step_name == "b"
  ));

  let mut graph = chain(&[("a", "dummy"), ("b", "dummy")]);
  graph.find_step_mut("a").unwrap().distribution = Distribution::Keyed { field: String::new() };
  assert!(matches!(
    topology::validate_structure(&graph),
    Err(StepflowError::ConfigurationError { ref step_name, .. }) if step_name == "a"
  ));

  let mut graph = chain(&[("a", "dummy"), ("b", "dummy")]);
  graph.hops[0].group = Some(HopGroup::new("b", Distribution::Keyed { field: String::new() }));
  assert!(matches!(
    topology::validate_structure(&graph),
    Err(StepflowError::ConfigurationError { ref step_name, .. }) if step_name == "a"
  ));
}

#[test]
fn error_target_must_be_an_enabled_hop() {
  setup_tracing();
  let mut graph = chain(&[("a", "dummy"), ("b", "dummy")]);
  graph.add_step(StepNode::new("errors", "dummy")).unwrap();
  graph.find_step_mut("b").unwrap().error_handling = Some(ErrorHandling::new("errors"));
  assert!(matches!(
    topology::validate_structure(&graph),
    Err(StepflowError::ConfigurationError { .. })
  ));

  graph.add_hop("b", "errors").unwrap();
  assert!(topology::validate_structure(&graph).is_ok());

  graph.set_hop_enabled("b", "errors", false).unwrap();
  assert!(topology::validate_structure(&graph).is_err());
}

#[test]
fn references_to_connections_and_schemas_must_resolve() {
  setup_tracing();
  let mut graph = chain(&[("a", "dummy"), ("b", "dummy")]);
  graph.find_step_mut("a").unwrap().connections.push("warehouse".into());
  assert!(topology::validate_structure(&graph).is_err());
  graph.add_connection(ConnectionDef::new("warehouse").with_property("url", "db://warehouse"));
  assert!(topology::validate_structure(&graph).is_ok());

  graph.find_step_mut("b").unwrap().cluster_schema = Some("cluster".into());
  assert!(matches!(
    topology::validate_structure(&graph),
    Err(StepflowError::InvalidClusterSchema { .. })
  ));
  graph.add_cluster_schema(
    ClusterSchema::new("cluster", NodeIdentity::new("master", "127.0.0.1"))
      .with_slave(NodeIdentity::new("s1", "127.0.0.1")),
  );
  assert!(topology::validate_structure(&graph).is_ok());
  assert!(graph.is_clustered());
}

#[test]
fn unknown_step_types_are_caught_by_the_plan() {
  setup_tracing();
  let collector = Collector::new();
  let registry = test_registry(&collector);
  let graph = chain(&[("a", "numbers"), ("b", "teleport")]);
  match topology::plan(&graph, &registry) {
    Err(StepflowError::UnknownStepType { step_name, step_type }) => {
      assert_eq!(step_name, "b");
      assert_eq!(step_type, "teleport");
    }
    other => panic!("expected UnknownStepType, got {other:?}"),
  }
}

#[test]
fn dispatch_kind_follows_copy_counts() {
  setup_tracing();
  let node = |name: &str, copies: usize| StepNode::new(name, "dummy").with_copies(copies);
  let cases = [
    (1, 1, DispatchKind::OneToOne, 1),
    (1, 4, DispatchKind::OneToMany, 4),
    (3, 1, DispatchKind::ManyToOne, 3),
    (3, 3, DispatchKind::Paired, 3),
    (2, 3, DispatchKind::Mesh, 6),
  ];
  for (s, t, kind, queues) in cases {
    let hop = plan_hop(&node("from", s), &node("to", t));
    assert_eq!(hop.dispatch, kind, "{s} -> {t}");
    assert_eq!(hop.queue_count(), queues, "{s} -> {t}");
    assert_eq!(hop.queue_pairs().len(), queues, "{s} -> {t}");
  }
}

#[test]
fn repartitioning_never_pairs_copies() {
  setup_tracing();
  let from = StepNode::new("from", "dummy").with_copies(3);
  let to = StepNode::new("to", "dummy")
    .with_copies(3)
    .with_partitioning(PartitionAssignment::keyed("customer"));
  let hop = plan_hop(&from, &to);
  assert_eq!(hop.dispatch, DispatchKind::Mesh);
  assert_eq!(hop.queue_count(), 9);
  assert_eq!(hop.routing, HopRouting::Partitioned(PartitionAssignment::keyed("customer")));

  // Same partitioning on both sides: rows are already where they belong.
  let from = from.with_partitioning(PartitionAssignment::keyed("customer"));
  let hop = plan_hop(&from, &to);
  assert_eq!(hop.dispatch, DispatchKind::Paired);
  assert_eq!(hop.routing, HopRouting::Direct);
}

#[test]
fn unpartitioned_fan_out_is_round_robin() {
  setup_tracing();
  let hop = plan_hop(
    &StepNode::new("from", "dummy"),
    &StepNode::new("to", "dummy").with_copies(2),
  );
  assert_eq!(hop.routing, HopRouting::RoundRobin);
  assert_eq!(hop.queue_pairs(), vec![(0, 0), (0, 1)]);
}

#[test]
fn graphs_survive_a_json_round_trip() {
  setup_tracing();
  let mut graph = PipelineGraph::new("persisted").with_row_set_size(500);
  graph
    .add_step(StepNode::new("src", "generate_rows").with_setting("limit", 10))
    .unwrap()
    .add_step(
      StepNode::new("work", "dummy")
        .with_copies(2)
        .with_partitioning(PartitionAssignment::modulo("id"))
        .with_error_handling(ErrorHandling::new("errors").with_max_errors(5)),
    )
    .unwrap()
    .add_step(StepNode::new("errors", "dummy"))
    .unwrap();
  graph.add_hop("src", "work").unwrap();
  graph.add_hop("work", "errors").unwrap();

  let json = graph.to_json().unwrap();
  let back = PipelineGraph::from_json(&json).unwrap();
  assert_eq!(back, graph);
  assert_eq!(back.role, GraphRole::Standalone);

  let minimal = r#"{ "name": "tiny", "steps": [ { "name": "only", "step_type": "dummy" } ] }"#;
  let tiny = PipelineGraph::from_json(minimal).unwrap();
  assert_eq!(tiny.steps[0].copies, 1);
  assert_eq!(tiny.steps[0].distribution, Distribution::RoundRobin);

  assert!(matches!(
    PipelineGraph::from_json("{ not json"),
    Err(StepflowError::InvalidGraph { .. })
  ));
}

#[test]
fn removing_a_step_drops_its_hops() {
  setup_tracing();
  let mut graph = chain(&[("a", "dummy"), ("b", "dummy"), ("c", "dummy")]);
  let removed = graph.remove_step("b").unwrap();
  assert_eq!(removed.name, "b");
  assert!(graph.hops.is_empty());
  assert!(graph.next_steps("a").is_empty());
  assert!(graph.remove_step("b").is_none());
}
