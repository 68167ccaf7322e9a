// stepflow/examples/basic_pipeline.rs

use std::sync::Arc;
use stepflow::steps::GENERATE_ROWS;
use stepflow::{
  Coordinator, EngineConfig, ErrorHandling, InputRow, PartitionAssignment, PipelineGraph, RowEmitter, RowError,
  StepContext, StepControl, StepLogic, StepNode, StepRegistry, StepflowError, Value,
};
use tracing::info;

/// Rejects ids divisible by 7, passes everything else.
struct Validate;

impl StepLogic for Validate {
  fn process(&mut self, input: Option<&InputRow>, out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    let Some(input) = input else {
      return Ok(StepControl::Done);
    };
    let id = input.row.get_by_name(&input.shape, "id")?.as_integer().unwrap_or_default();
    if id % 7 == 0 {
      return Err(RowError::new(format!("id {id} is unlucky")).field("id").code("VAL-7").into());
    }
    out.emit(input.row.clone(), &input.shape);
    Ok(StepControl::Continue)
  }
}

/// Logs every row it sees, tagged with its copy number.
struct Print {
  label: String,
}

impl StepLogic for Print {
  fn process(&mut self, input: Option<&InputRow>, _out: &mut RowEmitter) -> anyhow::Result<StepControl> {
    let Some(input) = input else {
      return Ok(StepControl::Done);
    };
    let values: Vec<String> = input.row.iter().map(Value::to_string).collect();
    info!("{}: {}", self.label, values.join(", "));
    Ok(StepControl::Continue)
  }
}

fn main() -> Result<(), StepflowError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Basic Pipeline Example ---");

  let registry = StepRegistry::with_builtins();
  registry.register_fn("validate", || Validate);
  registry.register("print", |ctx: &StepContext| {
    Ok(Box::new(Print {
      label: format!("{}.{}", ctx.step_name(), ctx.copy),
    }) as Box<dyn StepLogic>)
  });

  // generate -> validate (2 copies, keyed on region) -> accepted
  //                  \-> rejected (error hop)
  let mut graph = PipelineGraph::new("basic");
  graph
    .add_step(
      StepNode::new("generate", GENERATE_ROWS)
        .with_setting("limit", 30)
        .with_setting("value.region", "emea"),
    )?
    .add_step(
      StepNode::new("validate", "validate")
        .with_copies(2)
        .with_partitioning(PartitionAssignment::keyed("id"))
        .with_error_handling(ErrorHandling::new("rejected").with_max_errors(10)),
    )?
    .add_step(StepNode::new("accepted", "print"))?
    .add_step(StepNode::new("rejected", "print"))?;
  graph.add_hop("generate", "validate")?;
  graph.add_hop("validate", "accepted")?;
  graph.add_hop("validate", "rejected")?;

  let config = EngineConfig::default().with_env_overrides()?;
  let result = Coordinator::new(graph, Arc::new(registry), config).execute()?;

  info!(
    "Finished with {:?}: read {}, written {}, rejected {}, errors {} in {:?}",
    result.outcome, result.lines_read, result.lines_written, result.lines_rejected, result.errors, result.duration
  );
  for report in &result.steps {
    info!(
      "  {}.{} {:?}: in {}, out {}, rejected {}",
      report.step_name, report.copy, report.status, report.lines_read, report.lines_written, report.lines_rejected
    );
  }
  Ok(())
}
