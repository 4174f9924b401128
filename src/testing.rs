//! Shared helpers for the crate's own tests

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

use crate::config::RunnerConfig;
use crate::core::{Builder, Discovery};
use crate::models::{TestResult, TestStatus};
use crate::plugins::standard;

/// Ordered record of what ran
pub(crate) type Trace = Arc<Mutex<Vec<String>>>;

pub(crate) fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn record(trace: &Trace, entry: impl Into<String>) {
    trace.lock().push(entry.into());
}

pub(crate) fn entries(trace: &Trace) -> Vec<String> {
    trace.lock().clone()
}

pub(crate) fn config() -> RunnerConfig {
    RunnerConfig {
        random_seed: Some("fixed seed".into()),
        ..Default::default()
    }
}

/// Builder with every standard plugin
pub(crate) fn builder(config: RunnerConfig) -> Builder {
    let mut builder = Builder::new(config.clone());
    builder.add_plugin(standard(&config));
    builder
}

/// Run a single suite named "suite"
pub(crate) async fn run_suite<F, Fut>(content: F) -> Arc<TestResult>
where
    F: Fn(Discovery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    run_suite_with(config(), content).await
}

pub(crate) async fn run_suite_with<F, Fut>(config: RunnerConfig, content: F) -> Arc<TestResult>
where
    F: Fn(Discovery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut builder = builder(config);
    builder.add_suite("suite", content);
    builder.build().await.run(None).await
}

/// Result reached by following child labels
pub(crate) fn find(result: &Arc<TestResult>, path: &[&str]) -> Arc<TestResult> {
    let mut current = result.clone();
    for label in path {
        let next = current
            .children()
            .into_iter()
            .find(|c| c.label() == Some(*label))
            .unwrap_or_else(|| panic!("no result labelled '{label}'"));
        current = next;
    }
    current
}

/// Aggregate classification of the result at `path`
pub(crate) fn status_at(result: &Arc<TestResult>, path: &[&str]) -> TestStatus {
    find(result, path).get_descendant_summary().status()
}
