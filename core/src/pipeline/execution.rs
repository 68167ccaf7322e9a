// stepflow/src/pipeline/execution.rs

//! Contains the `Coordinator`, which turns a validated `PipelineGraph` into
//! queues and step runners, starts one thread per step copy and collects the
//! outcome.

use super::definition::PipelineGraph;
use super::result::PipelineResult;
use super::topology::{self, ExecutionPlan};
use crate::config::EngineConfig;
use crate::core::context::StepContext;
use crate::core::control::StopHandle;
use crate::error::{StepflowError, StepflowResult};
use crate::queue::{QueueId, RowQueue};
use crate::registry::StepRegistry;
use crate::step::output::OutputHop;
use crate::step::runner::StepRunner;
use crate::step::status::{StepMetrics, StepReport};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{event, instrument, Level};

/// Lifecycle of a coordinator. Each coordinator runs its graph once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
  Idle,
  Prepared,
  Running,
  Finished,
}

impl fmt::Display for CoordinatorState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self, f)
  }
}

pub struct Coordinator {
  graph: PipelineGraph,
  registry: Arc<StepRegistry>,
  config: EngineConfig,
  stop: StopHandle,
  state: CoordinatorState,
  plan: Option<ExecutionPlan>,
  runners: Vec<StepRunner>,
  metrics: Vec<Arc<StepMetrics>>,
  queues: Vec<Arc<RowQueue>>,
  handles: Vec<JoinHandle<()>>,
  started_at: Option<Instant>,
}

impl Coordinator {
  pub fn new(graph: PipelineGraph, registry: Arc<StepRegistry>, config: EngineConfig) -> Self {
    Self {
      graph,
      registry,
      config,
      stop: StopHandle::new(),
      state: CoordinatorState::Idle,
      plan: None,
      runners: Vec::new(),
      metrics: Vec::new(),
      queues: Vec::new(),
      handles: Vec::new(),
      started_at: None,
    }
  }

  pub fn graph(&self) -> &PipelineGraph {
    &self.graph
  }

  pub fn state(&self) -> CoordinatorState {
    self.state
  }

  pub fn plan(&self) -> Option<&ExecutionPlan> {
    self.plan.as_ref()
  }

  /// Every queue allocated by `prepare`.
  pub fn queues(&self) -> &[Arc<RowQueue>] {
    &self.queues
  }

  pub fn stop_handle(&self) -> StopHandle {
    self.stop.clone()
  }

  fn expect_state(&self, expected: CoordinatorState) -> StepflowResult<()> {
    if self.state != expected {
      return Err(StepflowError::InvalidState {
        expected: expected.to_string(),
        found: self.state.to_string(),
      });
    }
    Ok(())
  }

  /// Validates the graph, allocates queues, builds one runner per step copy
  /// and initializes them all. If any copy fails to initialize, every copy
  /// is disposed and no thread is started.
  #[instrument(
    name = "Coordinator::prepare",
    skip_all,
    fields(pipeline = %self.graph.name, steps = self.graph.steps.len()),
    err(Display)
  )]
  pub fn prepare(&mut self) -> StepflowResult<()> {
    self.expect_state(CoordinatorState::Idle)?;
    self.config.validate()?;
    let plan = topology::plan(&self.graph, &self.registry)?;
    let capacity = self.graph.effective_row_set_size(&self.config);

    // Queues per hop, grouped by the source copy writing them and the target copy reading them.
    let mut outputs: HashMap<(String, usize), Vec<OutputHop>> = HashMap::new();
    let mut inputs: HashMap<(String, usize), Vec<Arc<RowQueue>>> = HashMap::new();
    for hop in &plan.hops {
      let mut per_source: BTreeMap<usize, Vec<Arc<RowQueue>>> = BTreeMap::new();
      for (from_copy, to_copy) in hop.queue_pairs() {
        let id = QueueId {
          from_step: hop.from.clone(),
          from_copy,
          to_step: hop.to.clone(),
          to_copy,
        };
        let queue = Arc::new(RowQueue::new(id, capacity));
        per_source.entry(from_copy).or_default().push(Arc::clone(&queue));
        inputs.entry((hop.to.clone(), to_copy)).or_default().push(Arc::clone(&queue));
        self.queues.push(queue);
      }
      for (from_copy, queues) in per_source {
        outputs
          .entry((hop.from.clone(), from_copy))
          .or_default()
          .push(OutputHop::new(hop.to.clone(), queues, hop.routing.clone()).with_group(hop.group.clone()));
      }
    }
    event!(Level::DEBUG, queues = self.queues.len(), capacity, "Row queues allocated.");

    let mut failures = Vec::new();
    for step_name in &plan.order {
      let Some(node) = self.graph.find_step(step_name) else {
        return Err(StepflowError::UnknownStep {
          step_name: step_name.clone(),
        });
      };
      let input_steps: Vec<String> = self.graph.previous_steps(step_name).iter().map(|s| s.name.clone()).collect();
      let error_target = node.error_handling.as_ref().map(|eh| eh.target_step.clone());
      let output_steps: Vec<String> = self
        .graph
        .next_steps(step_name)
        .iter()
        .map(|s| s.name.clone())
        .filter(|name| Some(name) != error_target.as_ref())
        .collect();
      let connections = node
        .connections
        .iter()
        .filter_map(|name| self.graph.find_connection(name).cloned())
        .collect::<Vec<_>>();

      for copy in 0..node.copies {
        let ctx = StepContext {
          pipeline_name: self.graph.name.clone(),
          node: node.clone(),
          copy,
          input_steps: input_steps.clone(),
          output_steps: output_steps.clone(),
          connections: connections.clone(),
          config: self.config.clone(),
          stop: self.stop.clone(),
        };
        let logic = match self.registry.create(&ctx) {
          Ok(logic) => logic,
          Err(err) => {
            let metrics = Arc::new(StepMetrics::new(step_name.clone(), copy));
            metrics.record_error(err.to_string());
            self.metrics.push(metrics);
            failures.push(err.to_string());
            continue;
          }
        };
        let mut copy_outputs = outputs.remove(&(step_name.clone(), copy)).unwrap_or_default();
        let error_hop = match &error_target {
          Some(target) => copy_outputs
            .iter()
            .position(|hop| hop.target_step() == target)
            .map(|idx| copy_outputs.remove(idx)),
          None => None,
        };
        let copy_inputs = inputs.remove(&(step_name.clone(), copy)).unwrap_or_default();
        let runner = StepRunner::new(ctx, logic, copy_inputs, copy_outputs, error_hop);
        self.metrics.push(runner.metrics());
        self.runners.push(runner);
      }
    }

    if failures.is_empty() {
      failures = self.init_runners();
    }
    if !failures.is_empty() {
      event!(Level::ERROR, failed = failures.len(), "Pipeline preparation failed; disposing every step copy.");
      for runner in self.runners.drain(..) {
        runner.abandon();
      }
      self.state = CoordinatorState::Finished;
      return Err(StepflowError::PrepareFailed {
        failed: failures.len(),
        messages: failures,
      });
    }

    self.plan = Some(plan);
    self.state = CoordinatorState::Prepared;
    event!(Level::DEBUG, copies = self.runners.len(), "Pipeline prepared.");
    Ok(())
  }

  /// Initializes every runner concurrently, returning the failure messages.
  fn init_runners(&mut self) -> Vec<String> {
    thread::scope(|scope| {
      let pending: Vec<_> = self
        .runners
        .iter_mut()
        .map(|runner| scope.spawn(move || runner.init().err().map(|e| e.to_string())))
        .collect();
      pending
        .into_iter()
        .filter_map(|handle| match handle.join() {
          Ok(outcome) => outcome,
          Err(_) => Some("step initialization panicked".to_string()),
        })
        .collect()
    })
  }

  /// Starts one named thread (`<step>.<copy>`) per prepared runner.
  #[instrument(name = "Coordinator::start", skip_all, fields(pipeline = %self.graph.name), err(Display))]
  pub fn start(&mut self) -> StepflowResult<()> {
    self.expect_state(CoordinatorState::Prepared)?;
    self.started_at = Some(Instant::now());
    self.state = CoordinatorState::Running;
    for runner in self.runners.drain(..) {
      let thread_name = format!("{}.{}", runner.step_name(), runner.copy());
      let spawned = thread::Builder::new().name(thread_name).spawn(move || runner.run());
      match spawned {
        Ok(handle) => self.handles.push(handle),
        Err(err) => {
          // Runners already started see the stop flag; the rest are dropped unstarted.
          event!(Level::ERROR, error = %err, "Failed to spawn a step thread.");
          self.stop.stop_all();
          return Err(StepflowError::Io(err));
        }
      }
    }
    event!(Level::INFO, threads = self.handles.len(), "Pipeline started.");
    Ok(())
  }

  /// Blocks until every runner thread has ended and aggregates the outcome.
  #[instrument(name = "Coordinator::wait_until_finished", skip_all, fields(pipeline = %self.graph.name))]
  pub fn wait_until_finished(&mut self) -> PipelineResult {
    let mut error_messages = Vec::new();
    for handle in self.handles.drain(..) {
      if handle.join().is_err() {
        error_messages.push("a step thread ended abnormally".to_string());
      }
    }
    self.state = CoordinatorState::Finished;
    let duration = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
    let reports = self.step_reports();
    for metrics in &self.metrics {
      error_messages.extend(metrics.error_messages());
    }
    let result = PipelineResult::from_reports(&self.graph.name, reports, error_messages, duration);
    event!(
      Level::INFO,
      outcome = ?result.outcome,
      read = result.lines_read,
      written = result.lines_written,
      rejected = result.lines_rejected,
      errors = result.errors,
      elapsed_ms = duration.as_millis() as u64,
      "Pipeline finished."
    );
    result
  }

  /// Prepares, starts and waits. Configuration and initialization problems
  /// are returned as errors; runtime failures are reported in the result.
  pub fn execute(&mut self) -> StepflowResult<PipelineResult> {
    self.prepare()?;
    self.start()?;
    Ok(self.wait_until_finished())
  }

  /// Asks every runner to stop at its next row boundary.
  pub fn stop_all(&self) {
    event!(Level::INFO, pipeline = %self.graph.name, "Stop requested.");
    self.stop.stop_all();
  }

  pub fn pause(&self) {
    event!(Level::DEBUG, pipeline = %self.graph.name, "Pausing pipeline.");
    self.stop.pause();
  }

  pub fn resume(&self) {
    event!(Level::DEBUG, pipeline = %self.graph.name, "Resuming pipeline.");
    self.stop.resume();
  }

  pub fn is_paused(&self) -> bool {
    self.stop.is_paused()
  }

  /// Live status and counters of every step copy.
  pub fn step_reports(&self) -> Vec<StepReport> {
    self.metrics.iter().map(|m| m.report()).collect()
  }
}

impl Drop for Coordinator {
  fn drop(&mut self) {
    // Never leave detached runner threads behind.
    if !self.handles.is_empty() {
      self.stop.stop_all();
      for handle in self.handles.drain(..) {
        let _ = handle.join();
      }
    }
    for runner in self.runners.drain(..) {
      runner.abandon();
    }
  }
}
