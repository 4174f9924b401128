//! Outcome models
//!
//! Statuses, summaries, stages and the result tree produced by a run.

mod result;
mod stage;
mod summary;

pub use result::{ChildOptions, TestResult};
pub use stage::{IntoOutcome, ResultStage, StageOptions};
pub use summary::{Summary, TestStatus};
