//! Domain model: change requests, runs, and the error taxonomy.

pub mod error;
pub mod request;
pub mod run;

pub use error::{PipelineError, Result};
pub use request::{ChangeRequest, FeatureKey, Priority};
pub use run::{Disposition, PipelineRun, RunState, RunStatus};
