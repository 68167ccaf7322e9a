// stepflow/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepflowError {
  // --- Configuration errors: detected before any thread starts ---
  #[error("Invalid pipeline graph: {message}")]
  InvalidGraph { message: String },

  #[error("Cycle detected in pipeline graph involving steps: {steps:?}")]
  CycleDetected { steps: Vec<String> },

  #[error("Step not found: {step_name}")]
  UnknownStep { step_name: String },

  #[error("No step type '{step_type}' registered (used by step '{step_name}')")]
  UnknownStepType { step_name: String, step_type: String },

  #[error("Invalid cluster schema '{schema}': {message}")]
  InvalidClusterSchema { schema: String, message: String },

  #[error("Configuration error for step '{step_name}': {message}")]
  ConfigurationError { step_name: String, message: String },

  #[error("Engine configuration error: {0}")]
  Config(String),

  // --- Row-level errors ---
  #[error("Field '{field}' not found in row shape")]
  FieldNotFound { field: String },

  #[error("Row shape mismatch: shape has {expected} values, row has {actual}")]
  ShapeMismatch { expected: usize, actual: usize },

  #[error("Invalid shape edit: {0}")]
  InvalidShapeEdit(String),

  #[error("Partition routing failed: {0}")]
  Routing(String),

  // --- Runtime errors ---
  #[error("Initialization of step '{step_name}' (copy {copy}) failed. Source: {source}")]
  InitFailed {
    step_name: String,
    copy: usize,
    #[source]
    source: AnyhowError,
  },

  #[error("{failed} step copies failed to initialize: {messages:?}")]
  PrepareFailed { failed: usize, messages: Vec<String> },

  #[error("Step '{step_name}' exceeded its error threshold: {message}")]
  ErrorThreshold { step_name: String, message: String },

  #[error("Row queue {queue} is closed")]
  QueueClosed { queue: String },

  #[error("Socket error on {endpoint}: {message}")]
  Socket { endpoint: String, message: String },

  #[error("Wire format error: {0}")]
  Wire(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Invalid pipeline state: expected {expected}, found {found}")]
  InvalidState { expected: String, found: String },

  #[error("Error in step logic or external operation. Source: {source}")]
  StepLogic {
    #[source]
    source: AnyhowError,
  },

  #[error("Internal stepflow error: {0}")]
  Internal(String),
}

// Step logic returns anyhow::Error; this is the conversion the engine relies on.
impl From<AnyhowError> for StepflowError {
  fn from(err: AnyhowError) -> Self {
    StepflowError::StepLogic { source: err }
  }
}

impl From<serde_json::Error> for StepflowError {
  fn from(err: serde_json::Error) -> Self {
    StepflowError::Wire(err.to_string())
  }
}

impl StepflowError {
  /// True for errors detected while validating or splitting a graph,
  /// i.e. before any runner thread was started.
  pub fn is_configuration_error(&self) -> bool {
    matches!(
      self,
      StepflowError::InvalidGraph { .. }
        | StepflowError::CycleDetected { .. }
        | StepflowError::UnknownStep { .. }
        | StepflowError::UnknownStepType { .. }
        | StepflowError::InvalidClusterSchema { .. }
        | StepflowError::ConfigurationError { .. }
        | StepflowError::Config(_)
    )
  }
}

pub type StepflowResult<T, E = StepflowError> = std::result::Result<T, E>;
