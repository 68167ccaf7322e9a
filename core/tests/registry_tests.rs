// tests/registry_tests.rs
mod common;

use common::*;
use serial_test::serial;
use stepflow::cluster::{SOCKET_READER, SOCKET_WRITER};
use stepflow::steps::{DUMMY, GENERATE_ROWS};
use stepflow::{
  Coordinator, EngineConfig, InputRow, PipelineGraph, RowEmitter, StepContext, StepControl, StepLogic, StepNode,
  StepRegistry, StepflowError, StopHandle,
};

fn context_for(node: StepNode) -> StepContext {
  StepContext {
    pipeline_name: "registry".to_string(),
    node,
    copy: 0,
    input_steps: Vec::new(),
    output_steps: Vec::new(),
    connections: Vec::new(),
    config: EngineConfig::default(),
    stop: StopHandle::new(),
  }
}

struct Constant(StepControl);

impl StepLogic for Constant {
  fn process(&mut self, _input: Option<&InputRow>, _out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    Ok(self.0)
  }
}

#[test]
fn builtins_are_registered() {
  setup_tracing();
  let registry = StepRegistry::with_builtins();
  for step_type in [DUMMY, GENERATE_ROWS, SOCKET_WRITER, SOCKET_READER] {
    assert!(registry.contains(step_type), "missing builtin {step_type}");
  }
  assert!(!StepRegistry::new().contains(DUMMY));
}

#[test]
fn step_types_are_listed_sorted() {
  setup_tracing();
  let registry = StepRegistry::new();
  registry.register_fn("zeta", || Constant(StepControl::Done));
  registry.register_fn("alpha", || Constant(StepControl::Done));
  registry.register_fn("mid", || Constant(StepControl::Done));
  assert_eq!(registry.step_types(), vec!["alpha", "mid", "zeta"]);
  assert!(format!("{registry:?}").contains("alpha"));
}

#[test]
fn registering_again_replaces_the_factory() {
  setup_tracing();
  let registry = StepRegistry::new();
  registry.register_fn("answer", || Constant(StepControl::Continue));
  registry.register_fn("answer", || Constant(StepControl::Done));
  assert_eq!(registry.step_types().len(), 1);

  let mut logic = registry.create(&context_for(StepNode::new("a", "answer"))).unwrap();
  let mut out = RowEmitter::new();
  assert_eq!(logic.process(None, &mut out).unwrap(), StepControl::Done);
}

#[test]
fn unknown_step_types_are_reported_with_the_step_name() {
  setup_tracing();
  let registry = StepRegistry::with_builtins();
  match registry.create(&context_for(StepNode::new("loader", "csv_input"))) {
    Err(StepflowError::UnknownStepType { step_name, step_type }) => {
      assert_eq!(step_name, "loader");
      assert_eq!(step_type, "csv_input");
    }
    other => panic!("expected UnknownStepType, got {:?}", other.map(|_| ())),
  }
}

#[test]
fn factory_failures_become_init_failures() {
  setup_tracing();
  let registry = StepRegistry::new();
  registry.register("picky", |ctx: &StepContext| {
    if ctx.setting("mode").is_none() {
      anyhow::bail!("mode is required");
    }
    Ok(Box::new(Constant(StepControl::Done)) as Box<dyn StepLogic>)
  });

  let err = registry.create(&context_for(StepNode::new("p", "picky"))).err().unwrap();
  assert!(matches!(err, StepflowError::InitFailed { ref step_name, copy: 0, .. } if step_name == "p"));
  assert!(err.to_string().contains("mode is required"));
  assert!(registry.create(&context_for(StepNode::new("p", "picky").with_setting("mode", "strict"))).is_ok());
}

#[test]
fn generate_rows_requires_a_valid_limit() {
  setup_tracing();
  let registry = StepRegistry::with_builtins();
  let missing = registry.create(&context_for(StepNode::new("gen", GENERATE_ROWS))).err().unwrap();
  assert!(missing.to_string().contains("missing required setting 'limit'"), "{missing}");

  let bad = StepNode::new("gen", GENERATE_ROWS).with_setting("limit", "many");
  assert!(registry.create(&context_for(bad)).is_err());
}

#[test]
#[serial]
fn generate_rows_feeds_a_pipeline() {
  setup_tracing();
  let collector = Collector::new();
  let mut graph = PipelineGraph::new("generated");
  graph
    .add_step(
      StepNode::new("gen", GENERATE_ROWS)
        .with_setting("limit", 25)
        .with_setting("start", 100)
        .with_setting("field", "id")
        .with_setting("value.region", "emea"),
    )
    .unwrap()
    .add_step(StepNode::new("pass", DUMMY))
    .unwrap()
    .add_step(StepNode::new("sink", "collect"))
    .unwrap();
  graph.add_hop("gen", "pass").unwrap();
  graph.add_hop("pass", "sink").unwrap();

  let result = Coordinator::new(graph, test_registry(&collector), test_config()).execute().unwrap();

  assert!(result.is_success(), "{:?}", result.error_messages);
  assert_eq!(collector.ids("sink"), (100..125).collect::<Vec<_>>());
  let rows = collector.for_step("sink");
  assert!(rows.iter().all(|c| c.string("region").as_deref() == Some("emea")));
  assert_eq!(rows[0].shape.names(), vec!["id", "region"]);
  assert_eq!(result.lines_written_by("gen"), 25);
}
