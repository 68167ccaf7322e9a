pub mod error_handling;
pub mod output;
pub mod runner;
pub mod status;

pub use error_handling::ErrorHandling;
pub use output::{HopRouting, OutputHop};
pub use runner::StepRunner;
pub use status::{StepMetrics, StepReport, StepStatus};
