// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use parking_lot::Mutex;
use stepflow::{
  EngineConfig, InputRow, Row, RowEmitter, RowError, RowShape, StepContext, StepControl, StepLogic, StepRegistry,
  Value, ValueDescriptor,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::Level;

// --- Common Error Type for Tests ---
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  #[error("Test step failed: {0}")]
  Step(String),

  #[error("Test init failed: {0}")]
  Init(String),
}

// --- Rows collected by sink steps ---
#[derive(Debug, Clone)]
pub struct Collected {
  pub step: String,
  pub copy: usize,
  pub pipeline: String,
  pub row: Row,
  pub shape: RowShape,
}

impl Collected {
  pub fn int(&self, field: &str) -> Option<i64> {
    self.row.get_by_name(&self.shape, field).ok().and_then(Value::as_integer)
  }

  pub fn string(&self, field: &str) -> Option<String> {
    self.row.get_by_name(&self.shape, field).ok().and_then(|v| v.as_str().map(str::to_string))
  }
}

#[derive(Debug, Clone, Default)]
pub struct Collector(Arc<Mutex<Vec<Collected>>>);

impl Collector {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, item: Collected) {
    self.0.lock().push(item);
  }

  pub fn all(&self) -> Vec<Collected> {
    self.0.lock().clone()
  }

  pub fn len(&self) -> usize {
    self.0.lock().len()
  }

  pub fn for_step(&self, step: &str) -> Vec<Collected> {
    self.0.lock().iter().filter(|c| c.step == step).cloned().collect()
  }

  /// `id` values collected by `step`, sorted.
  pub fn ids(&self, step: &str) -> Vec<i64> {
    let mut ids: Vec<i64> = self.for_step(step).iter().filter_map(|c| c.int("id")).collect();
    ids.sort_unstable();
    ids
  }

  /// `id` values per copy of `step`, in arrival order.
  pub fn ids_by_copy(&self, step: &str) -> BTreeMap<usize, Vec<i64>> {
    let mut by_copy: BTreeMap<usize, Vec<i64>> = BTreeMap::new();
    for c in self.for_step(step) {
      if let Some(id) = c.int("id") {
        by_copy.entry(c.copy).or_default().push(id);
      }
    }
    by_copy
  }
}

// --- Test step logic ---

/// Emits `count` rows `(id, key)` with ids `1..=count` and `key = id % modulo`.
pub struct NumbersSource {
  next: i64,
  count: i64,
  modulo: i64,
  delay: Option<Duration>,
  shape: RowShape,
}

impl NumbersSource {
  pub fn from_context(ctx: &StepContext) -> anyhow::Result<Self> {
    let shape = RowShape::new();
    shape.add_value(ValueDescriptor::integer("id"));
    shape.add_value(ValueDescriptor::integer("key"));
    Ok(Self {
      next: 1,
      count: ctx.parsed_setting("count")?.unwrap_or(100),
      modulo: ctx.parsed_setting("modulo")?.unwrap_or(10),
      delay: ctx.parsed_setting::<u64>("delay_ms")?.map(Duration::from_millis),
      shape,
    })
  }
}

impl StepLogic for NumbersSource {
  fn process(&mut self, _input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    // count < 0 means endless
    if self.count >= 0 && self.next > self.count {
      return Ok(StepControl::Done);
    }
    if let Some(delay) = self.delay {
      thread::sleep(delay);
    }
    out.emit(
      Row::from(vec![Value::Integer(self.next), Value::Integer(self.next % self.modulo)]),
      &self.shape,
    );
    self.next += 1;
    Ok(StepControl::Continue)
  }
}

/// Records every input row in a collector.
pub struct CollectSink {
  collector: Collector,
  step: String,
  copy: usize,
  pipeline: String,
  forward: bool,
}

impl StepLogic for CollectSink {
  fn process(&mut self, input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    let Some(input) = input else {
      return Ok(StepControl::Done);
    };
    self.collector.push(Collected {
      step: self.step.clone(),
      copy: self.copy,
      pipeline: self.pipeline.clone(),
      row: input.row.clone(),
      shape: input.shape.clone(),
    });
    if self.forward {
      out.emit(input.row.clone(), &input.shape);
    }
    Ok(StepControl::Continue)
  }
}

/// Fails every row whose `id` is divisible by `every`.
pub struct FailEvery {
  every: i64,
}

impl StepLogic for FailEvery {
  fn process(&mut self, input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    let Some(input) = input else {
      return Ok(StepControl::Done);
    };
    let id = input
      .row
      .get_by_name(&input.shape, "id")?
      .as_integer()
      .ok_or_else(|| TestError::Step("id is not an integer".into()))?;
    if id % self.every == 0 {
      return Err(RowError::new(format!("id {id} rejected")).field("id").code("TEST-001").into());
    }
    out.emit(input.row.clone(), &input.shape);
    Ok(StepControl::Continue)
  }
}

/// Appends the pipeline name and copy number to each row.
pub struct TagCopy {
  copy: i64,
  pipeline: String,
  shape: Option<(RowShape, RowShape)>,
}

impl StepLogic for TagCopy {
  fn process(&mut self, input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    let Some(input) = input else {
      return Ok(StepControl::Done);
    };
    let out_shape = match &self.shape {
      Some((src, tagged)) if *src == input.shape => tagged.clone(),
      _ => {
        let tagged = input.shape.clone();
        tagged.add_value(ValueDescriptor::integer("copy"));
        tagged.add_value(ValueDescriptor::string("pipeline"));
        self.shape = Some((input.shape.clone(), tagged.clone()));
        tagged
      }
    };
    let mut row = input.row.clone();
    row.push(Value::Integer(self.copy));
    row.push(Value::String(self.pipeline.clone()));
    out.emit(row, &out_shape);
    Ok(StepControl::Continue)
  }
}

pub struct FailingInit;

impl StepLogic for FailingInit {
  fn init(&mut self, _ctx: &StepContext) -> anyhow::Result<()> {
    Err(TestError::Init("resource unavailable".into()).into())
  }

  fn process(&mut self, _input: Option<&InputRow>, _out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    Ok(StepControl::Done)
  }
}

/// Sleeps for `delay_ms` per row, then passes it on.
pub struct SlowPass {
  delay: Duration,
}

impl StepLogic for SlowPass {
  fn process(&mut self, input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    let Some(input) = input else {
      return Ok(StepControl::Done);
    };
    thread::sleep(self.delay);
    out.emit(input.row.clone(), &input.shape);
    Ok(StepControl::Continue)
  }
}

/// A registry with the built-ins plus the test step types:
/// `numbers`, `collect`, `collect_forward`, `fail_every`, `tag_copy`,
/// `failing_init` and `slow_pass`.
pub fn test_registry(collector: &Collector) -> Arc<StepRegistry> {
  let registry = StepRegistry::with_builtins();
  registry.register("numbers", |ctx| Ok(Box::new(NumbersSource::from_context(ctx)?) as Box<dyn StepLogic>));
  for (step_type, forward) in [("collect", false), ("collect_forward", true)] {
    let collector = collector.clone();
    registry.register(step_type, move |ctx| {
      Ok(Box::new(CollectSink {
        collector: collector.clone(),
        step: ctx.step_name().to_string(),
        copy: ctx.copy,
        pipeline: ctx.pipeline_name.clone(),
        forward,
      }) as Box<dyn StepLogic>)
    });
  }
  registry.register("fail_every", |ctx| {
    Ok(Box::new(FailEvery {
      every: ctx.parsed_setting("every")?.unwrap_or(10),
    }) as Box<dyn StepLogic>)
  });
  registry.register("tag_copy", |ctx| {
    Ok(Box::new(TagCopy {
      copy: ctx.copy as i64,
      pipeline: ctx.pipeline_name.clone(),
      shape: None,
    }) as Box<dyn StepLogic>)
  });
  registry.register_fn("failing_init", || FailingInit);
  registry.register("slow_pass", |ctx| {
    Ok(Box::new(SlowPass {
      delay: Duration::from_millis(ctx.parsed_setting("delay_ms")?.unwrap_or(1)),
    }) as Box<dyn StepLogic>)
  });
  Arc::new(registry)
}

/// Engine settings that keep tests fast.
pub fn test_config() -> EngineConfig {
  EngineConfig {
    row_set_size: 100,
    queue_timeout_ms: 10,
    stall_warning_ms: 2_000,
    socket_timeout_ms: 5_000,
    socket_connect_retry_ms: 20,
    socket_flush_rows: 50,
    ..EngineConfig::default()
  }
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
