//! Result tree
//!
//! One `TestResult` per executed node, plus the dynamically created children
//! used for retry attempts, repetitions and parameter variants.

use chrono::{DateTime, Utc};
use futures::future::{self, FutureExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::{ErrorKind, TestError};
use crate::events::{Event, Listener, ResultSnapshot};
use crate::models::stage::{status_of, IntoOutcome, ResultStage, StageOptions};
use crate::models::{Summary, TestStatus};

static NEXT_RESULT_ID: AtomicU64 = AtomicU64::new(1);

/// Options for a newly created child result
#[derive(Clone, Copy, Debug, Default)]
pub struct ChildOptions {
    /// The child counts as a test in summaries
    pub is_test: bool,
    /// Hidden from verbose reporting unless it failed
    pub boring: bool,
}

#[derive(Debug, Default)]
struct ResultState {
    boring: bool,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    duration: Option<Duration>,
    stages: Vec<ResultStage>,
    errors: Vec<TestError>,
    children: Vec<Arc<TestResult>>,
    previous: Option<Arc<TestResult>>,
    child_summary_override: Option<Summary>,
    output: String,
    /// Message of the error this result itself was cancelled with
    cancel_reason: Option<String>,
    /// A cancellation outcome has been recorded
    cancel_recorded: bool,
    invoked: bool,
    complete: bool,
}

/// Outcome record of one executed node
pub struct TestResult {
    id: u64,
    label: Option<String>,
    is_test: bool,
    parent: Weak<TestResult>,
    listener: Option<Arc<dyn Listener>>,
    cancel: watch::Sender<bool>,
    state: Mutex<ResultState>,
}

impl std::fmt::Debug for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestResult")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("is_test", &self.is_test)
            .finish_non_exhaustive()
    }
}

impl TestResult {
    fn create(
        label: Option<String>,
        is_test: bool,
        parent: Weak<TestResult>,
        listener: Option<Arc<dyn Listener>>,
    ) -> Self {
        Self {
            id: NEXT_RESULT_ID.fetch_add(1, Ordering::Relaxed),
            label,
            is_test,
            parent,
            listener,
            cancel: watch::channel(false).0,
            state: Mutex::new(ResultState::default()),
        }
    }

    /// Invisible root of a run
    pub fn root(listener: Option<Arc<dyn Listener>>) -> Arc<Self> {
        Arc::new(Self::create(None, false, Weak::new(), listener))
    }

    /// Append a child that has not started yet
    pub fn add_child(self: &Arc<Self>, label: Option<String>, options: ChildOptions) -> Arc<Self> {
        let child = Arc::new(Self::create(
            label,
            options.is_test,
            Arc::downgrade(self),
            self.listener.clone(),
        ));
        child.state.lock().boring = options.boring;

        let mut state = self.state.lock();
        if state.complete {
            warn!("child added to completed result {}", self.id);
        }
        state.children.push(child.clone());
        child
    }

    /// Create a child, run `work` against it, then complete it
    pub async fn create_child<F, Fut>(
        self: &Arc<Self>,
        label: Option<String>,
        options: ChildOptions,
        work: F,
    ) -> Arc<Self>
    where
        F: FnOnce(Arc<TestResult>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let child = self.add_child(label, options);
        child.start();
        work(child.clone()).await;
        child.finish();
        child
    }

    /// Run `work` as a named stage of this result.
    ///
    /// Stages that may be cancelled are refused once this result or an
    /// ancestor is cancelled, and abandoned if cancellation arrives while they
    /// are in flight. Neither is recorded as a stage; instead the result gets
    /// a "cancelled" skip (refused) or error (abandoned) so it can never read
    /// as a pass. Returns the stage classification, with `Skip` for a stage
    /// that never completed.
    pub async fn create_stage<F, Fut>(
        self: &Arc<Self>,
        options: StageOptions,
        label: impl Into<String>,
        work: F,
    ) -> TestStatus
    where
        F: FnOnce() -> Fut,
        Fut: Future,
        Fut::Output: IntoOutcome,
    {
        let label = label.into();
        if !options.no_cancel && self.is_cancelled() {
            trace!("stage '{}' not started: cancelled", label);
            self.record_cancelled(ErrorKind::Skip);
            return TestStatus::Skip;
        }

        let stage = if options.no_cancel {
            ResultStage::run(label, options, work).await
        } else {
            let run = ResultStage::run(label.clone(), options, work);
            tokio::select! {
                stage = run => stage,
                _ = self.cancelled() => {
                    debug!("stage '{}' abandoned after cancellation", label);
                    self.record_cancelled(ErrorKind::Error);
                    return TestStatus::Skip;
                }
            }
        };

        let status = stage.status();
        self.attach_stage(stage);
        status
    }

    /// Mark the result started and announce it
    pub fn start(&self) {
        {
            let mut state = self.state.lock();
            if state.invoked {
                return;
            }
            state.invoked = true;
            state.started = Some(Instant::now());
            state.started_at = Some(Utc::now());
        }
        self.emit(|| Event::Begin {
            id: self.id,
            parent: self.parent_id(),
            label: self.label.clone(),
            is_block: !self.is_test,
            time: Utc::now(),
        });
    }

    /// Freeze the result and announce its outcome
    pub fn finish(&self) {
        {
            let mut state = self.state.lock();
            if state.complete {
                return;
            }
            state.duration = state.started.map(|s| s.elapsed());
            state.complete = true;
        }
        trace!("result {} complete: {}", self.id, self.status());
        self.emit(|| Event::Complete {
            id: self.id,
            parent: self.parent_id(),
            time: Utc::now(),
            result: ResultSnapshot::capture(self),
        });
    }

    fn emit(&self, event: impl FnOnce() -> Event) {
        if let Some(listener) = &self.listener {
            listener.on_event(&event());
        }
    }

    fn mutate(&self, what: &str, apply: impl FnOnce(&mut ResultState)) {
        let mut state = self.state.lock();
        if state.complete {
            warn!("ignoring {} on completed result {}", what, self.id);
            return;
        }
        apply(&mut state);
    }

    /// Record a completed stage
    pub fn attach_stage(&self, stage: ResultStage) {
        self.mutate("stage", |state| state.stages.push(stage));
    }

    /// Record an error raised outside of any stage
    pub fn record_error(&self, error: TestError) {
        self.mutate("error", |state| state.errors.push(error));
    }

    /// Record `error` and cancel this result and all of its descendants
    pub fn cancel(&self, error: TestError) {
        let reason = error.message.clone();
        self.mutate("cancellation", |state| {
            state.cancel_reason = Some(reason);
            state.errors.push(error);
        });
        self.cancel.send_replace(true);
    }

    /// Message of the nearest cancellation at or above this result
    pub fn cancel_reason(&self) -> Option<String> {
        let own = self.state.lock().cancel_reason.clone();
        own.or_else(|| self.parent().and_then(|p| p.cancel_reason()))
    }

    /// Record once that work of this result was cut short by an ancestor's
    /// cancellation. The cancelled result itself already carries its error.
    fn record_cancelled(&self, kind: ErrorKind) {
        if *self.cancel.borrow() {
            return;
        }
        let reason = self
            .cancel_reason()
            .unwrap_or_else(|| "cancelled".to_string());
        self.mutate("cancellation outcome", |state| {
            if !state.cancel_recorded {
                state.cancel_recorded = true;
                state.errors.push(TestError::new(kind, format!("cancelled: {reason}")));
            }
        });
    }

    /// Complete every unfinished descendant after the work driving them was
    /// dropped. Started results get a "cancelled" error, results that never
    /// started a "cancelled" skip.
    pub fn abandon_descendants(&self) {
        for child in self.children() {
            if child.is_complete() {
                continue;
            }
            child.abandon_descendants();
            let kind = if child.is_invoked() {
                ErrorKind::Error
            } else {
                ErrorKind::Skip
            };
            child.start();
            child.record_cancelled(kind);
            child.finish();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        if *self.cancel.borrow() {
            return true;
        }
        self.parent().map(|p| p.is_cancelled()).unwrap_or(false)
    }

    /// Resolves once this result or an ancestor is cancelled
    pub async fn cancelled(&self) {
        let mut receivers = vec![self.cancel.subscribe()];
        let mut ancestor = self.parent();
        while let Some(result) = ancestor {
            receivers.push(result.cancel.subscribe());
            ancestor = result.parent();
        }

        let waits = receivers.into_iter().map(|mut rx| {
            async move {
                let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                if closed {
                    future::pending::<()>().await;
                }
            }
            .boxed()
        });
        future::select_all(waits).await;
    }

    /// Replace the children's contribution to the descendant summary
    pub fn override_child_summary(&self, summary: Summary) {
        self.mutate("summary override", |state| {
            state.child_summary_override = Some(summary)
        });
    }

    pub fn mark_boring(&self) {
        self.mutate("boring flag", |state| state.boring = true);
    }

    pub fn is_boring(&self) -> bool {
        self.state.lock().boring
    }

    pub fn append_output(&self, output: &str) {
        self.mutate("output", |state| state.output.push_str(output));
    }

    pub fn output(&self) -> Option<String> {
        let state = self.state.lock();
        (!state.output.is_empty()).then(|| state.output.clone())
    }

    /// Link to the attempt this result retries
    pub fn set_previous(&self, previous: Arc<TestResult>) {
        self.mutate("previous link", |state| state.previous = Some(previous));
    }

    pub fn previous(&self) -> Option<Arc<TestResult>> {
        self.state.lock().previous.clone()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_test(&self) -> bool {
        self.is_test
    }

    pub fn is_invoked(&self) -> bool {
        self.state.lock().invoked
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    pub fn parent(&self) -> Option<Arc<TestResult>> {
        self.parent.upgrade()
    }

    fn parent_id(&self) -> Option<u64> {
        self.parent.upgrade().map(|p| p.id)
    }

    pub fn children(&self) -> Vec<Arc<TestResult>> {
        self.state.lock().children.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    pub fn stages(&self) -> Vec<ResultStage> {
        self.state.lock().stages.clone()
    }

    pub fn has_tangible_stages(&self) -> bool {
        self.state.lock().stages.iter().any(|s| s.is_tangible())
    }

    /// All raised errors of every kind, stages first
    pub fn all_errors(&self) -> Vec<TestError> {
        let state = self.state.lock();
        state
            .stages
            .iter()
            .flat_map(|s| s.errors().iter().cloned())
            .chain(state.errors.iter().cloned())
            .collect()
    }

    fn errors_of(&self, kind: ErrorKind) -> Vec<TestError> {
        self.all_errors()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    pub fn errors(&self) -> Vec<TestError> {
        self.errors_of(ErrorKind::Error)
    }

    pub fn failures(&self) -> Vec<TestError> {
        self.errors_of(ErrorKind::Failure)
    }

    pub fn skip_reasons(&self) -> Vec<TestError> {
        self.errors_of(ErrorKind::Skip)
    }

    /// Classification of this result's own stages and errors
    pub fn status(&self) -> TestStatus {
        status_of(&self.all_errors())
    }

    /// Own contribution to the summary.
    ///
    /// A test leaf counts once with its classification (or without one while
    /// it has not started). Structural results only report errors and
    /// failures raised on themselves.
    pub fn get_summary(&self) -> Summary {
        let (invoked, leaf) = {
            let state = self.state.lock();
            let leaf = state.children.is_empty() && state.child_summary_override.is_none();
            (state.invoked, leaf)
        };
        if self.is_test && leaf {
            if invoked {
                Summary::of(self.status())
            } else {
                Summary::pending()
            }
        } else {
            Summary::partial(self.status())
        }
    }

    /// Own summary plus the children's (or their override)
    pub fn get_descendant_summary(&self) -> Summary {
        let (children, summary_override) = {
            let state = self.state.lock();
            (state.children.clone(), state.child_summary_override)
        };
        let below = match summary_override {
            Some(summary) => summary,
            None => children.iter().map(|c| c.get_descendant_summary()).sum(),
        };
        self.get_summary() + below
    }

    pub fn has_failed(&self) -> bool {
        self.get_descendant_summary().has_failed()
    }

    /// Duration of this result alone
    pub fn duration(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .duration
            .or_else(|| state.started.map(|s| s.elapsed()))
    }

    /// Duration including every previous attempt
    pub fn total_duration(&self) -> Duration {
        let own = self.duration().unwrap_or_default();
        match self.previous() {
            Some(previous) => own + previous.total_duration(),
            None => own,
        }
    }
}
