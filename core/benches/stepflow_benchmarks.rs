use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use stepflow::steps::{DUMMY, GENERATE_ROWS};
use stepflow::{
  Coordinator, EngineConfig, InputRow, PartitionAssignment, PartitionRouter, PipelineGraph, QueueId, QueueRead, Row,
  RowEmitter, RowQueue, RowShape, StepControl, StepLogic, StepNode, StepRegistry, Value, ValueDescriptor,
};

const TIMEOUT: Duration = Duration::from_millis(50);

fn bench_shape() -> RowShape {
  RowShape::from_descriptors(vec![ValueDescriptor::integer("id"), ValueDescriptor::string("customer")])
}

fn bench_row(i: i64) -> Row {
  Row::from(vec![Value::Integer(i), Value::String(format!("customer-{}", i % 97))])
}

// Swallows every row so the benchmark measures the engine, not a sink.
struct Discard;

impl StepLogic for Discard {
  fn process(&mut self, input: Option<&InputRow>, _out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    Ok(match input {
      Some(_) => StepControl::Continue,
      None => StepControl::Done,
    })
  }
}

fn bench_registry() -> Arc<StepRegistry> {
  let registry = StepRegistry::with_builtins();
  registry.register_fn("discard", || Discard);
  Arc::new(registry)
}

/// generate_rows -> dummy (x copies) -> discard
fn linear_graph(rows: u64, copies: usize) -> PipelineGraph {
  let mut graph = PipelineGraph::new("bench");
  graph
    .add_step(StepNode::new("gen", GENERATE_ROWS).with_setting("limit", rows))
    .and_then(|g| g.add_step(StepNode::new("pass", DUMMY).with_copies(copies)))
    .and_then(|g| g.add_step(StepNode::new("sink", "discard")))
    .unwrap();
  graph.add_hop("gen", "pass").unwrap();
  graph.add_hop("pass", "sink").unwrap();
  graph
}

// --- Benchmark Functions ---

fn bench_row_queue(c: &mut Criterion) {
  let mut group = c.benchmark_group("RowQueue");
  for batch in [100usize, 1_000, 10_000].iter() {
    group.throughput(Throughput::Elements(*batch as u64));
    group.bench_with_input(BenchmarkId::new("put_then_get", batch), batch, |b, &batch| {
      let shape = bench_shape();
      let id = QueueId {
        from_step: "a".into(),
        from_copy: 0,
        to_step: "b".into(),
        to_copy: 0,
      };
      b.iter(|| {
        let queue = RowQueue::new(id.clone(), batch);
        for i in 0..batch as i64 {
          let _ = queue.put(bench_row(i), shape.clone(), TIMEOUT);
        }
        let mut drained = 0;
        while let QueueRead::Row(_) = queue.try_get() {
          drained += 1;
        }
        assert_eq!(drained, batch);
      });
    });
  }
  group.finish();
}

fn bench_partition_routing(c: &mut Criterion) {
  let mut group = c.benchmark_group("PartitionRouting");
  let shape = bench_shape();
  let rows: Vec<Row> = (0..1_000).map(bench_row).collect();
  group.throughput(Throughput::Elements(rows.len() as u64));
  for (name, assignment) in [
    ("keyed", PartitionAssignment::keyed("customer")),
    ("modulo", PartitionAssignment::modulo("id")),
  ] {
    group.bench_function(name, |b| {
      b.iter(|| {
        rows
          .iter()
          .map(|row| PartitionRouter::route(row, &shape, &assignment, 8).unwrap_or(0))
          .sum::<usize>()
      });
    });
  }
  group.finish();
}

fn bench_linear_pipeline(c: &mut Criterion) {
  let mut group = c.benchmark_group("LinearPipeline");
  group.sample_size(10);
  let registry = bench_registry();
  let config = EngineConfig {
    row_set_size: 1_000,
    queue_timeout_ms: 5,
    ..EngineConfig::default()
  };
  let rows = 20_000u64;
  group.throughput(Throughput::Elements(rows));
  for copies in [1usize, 2, 4].iter() {
    group.bench_with_input(BenchmarkId::new("copies", copies), copies, |b, &copies| {
      b.iter(|| {
        let result = Coordinator::new(linear_graph(rows, copies), registry.clone(), config.clone())
          .execute()
          .unwrap();
        assert!(result.is_success());
      });
    });
  }
  group.finish();
}

criterion_group!(benches, bench_row_queue, bench_partition_routing, bench_linear_pipeline);
criterion_main!(benches);
