//! Result stages
//!
//! A stage records one named phase of work ("before each", "test",
//! "teardown", ...) and is immutable once the work has finished.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use crate::error::{ErrorKind, TestError};
use crate::models::TestStatus;
use crate::utils::Timer;

/// Options controlling how a stage is run and attributed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageOptions {
    /// Output written during this stage belongs to the result
    pub tangible: bool,
    /// Run even when the owning result has been cancelled
    pub no_cancel: bool,
}

impl StageOptions {
    pub fn tangible() -> Self {
        Self {
            tangible: true,
            no_cancel: false,
        }
    }

    pub fn no_cancel(mut self) -> Self {
        self.no_cancel = true;
        self
    }
}

/// Conversion of a unit of work's return value into an outcome
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<(), TestError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<(), TestError> {
        Ok(())
    }
}

impl<E: Into<TestError>> IntoOutcome for Result<(), E> {
    fn into_outcome(self) -> Result<(), TestError> {
        self.map_err(Into::into)
    }
}

/// Completed record of one phase of work
#[derive(Clone, Debug)]
pub struct ResultStage {
    label: String,
    tangible: bool,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    duration: Duration,
    errors: Vec<TestError>,
}

impl ResultStage {
    /// Run `work`, catching returned errors and panics, and freeze the outcome
    pub async fn run<F, Fut>(label: impl Into<String>, options: StageOptions, work: F) -> Self
    where
        F: FnOnce() -> Fut,
        Fut: Future,
        Fut::Output: IntoOutcome,
    {
        let timer = Timer::start(label);
        let outcome = match catch_unwind(AssertUnwindSafe(work)) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(payload) => Err(payload),
        };
        let errors = match outcome {
            Ok(value) => value.into_outcome().err().into_iter().collect(),
            Err(payload) => vec![TestError::from_panic(payload)],
        };

        let started_at = timer.started_at();
        let label = timer.label().to_string();
        let (ended_at, duration) = timer.stop();
        Self {
            label,
            tangible: options.tangible,
            started_at,
            ended_at,
            duration,
            errors,
        }
    }

    /// A stage that completed instantly with the given errors
    pub fn completed(label: impl Into<String>, errors: Vec<TestError>) -> Self {
        let now = Utc::now();
        Self {
            label: label.into(),
            tangible: false,
            started_at: now,
            ended_at: now,
            duration: Duration::ZERO,
            errors,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_tangible(&self) -> bool {
        self.tangible
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn errors(&self) -> &[TestError] {
        &self.errors
    }

    pub fn errors_of(&self, kind: ErrorKind) -> impl Iterator<Item = &TestError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }

    /// Error beats failure beats skip beats pass
    pub fn status(&self) -> TestStatus {
        status_of(&self.errors)
    }
}

/// Classification of a set of raised errors
pub(crate) fn status_of(errors: &[TestError]) -> TestStatus {
    errors
        .iter()
        .map(|e| match e.kind {
            ErrorKind::Error => TestStatus::Error,
            ErrorKind::Failure => TestStatus::Fail,
            ErrorKind::Skip => TestStatus::Skip,
        })
        .max()
        .unwrap_or(TestStatus::Pass)
}
