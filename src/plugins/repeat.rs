//! Repeat
//!
//! Runs a node a fixed number of times and reports the best passing
//! repetition, or the least bad failing one when too many failed.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::core::{
    order, Builder, Context, InterceptorOptions, Key, Next, Node, NodeOptions, OptionKey, Plugin,
    RunInterceptor,
};
use crate::models::{ChildOptions, Summary, TestResult};

pub const REPEAT: OptionKey<RepeatOptions> = Key::new("repeat");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatOptions {
    pub total: u32,
    /// Stop as soon as more than `max_failures` repetitions failed
    pub fail_fast: bool,
    /// Failed repetitions tolerated before the node fails
    pub max_failures: u32,
}

impl Default for RepeatOptions {
    fn default() -> Self {
        Self {
            total: 1,
            fail_fast: true,
            max_failures: 0,
        }
    }
}

impl From<u32> for RepeatOptions {
    fn from(total: u32) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }
}

impl NodeOptions {
    pub fn repeat(self, repeat: impl Into<RepeatOptions>) -> Self {
        self.with(&REPEAT, repeat.into())
    }
}

/// Fewer errors first, then fewer failures
fn less_bad(a: &Summary, b: &Summary) -> bool {
    (a.error, a.fail) < (b.error, b.fail)
}

struct Repeat;

impl RunInterceptor for Repeat {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        let repeat = match node.options().get(&REPEAT) {
            Some(repeat) if context.is_active() && repeat.total > 1 => *repeat,
            _ => return next.proceed(),
        };

        async move {
            let options = ChildOptions {
                is_test: node.is_test(),
                boring: true,
            };
            let mut best_pass: Option<Summary> = None;
            let mut best_fail: Option<Summary> = None;
            let mut failures = 0;

            for index in 1..=repeat.total {
                // A cancelled first repetition still records its outcome
                if index > 1 && result.is_cancelled() {
                    break;
                }
                let label = format!("repetition {index} of {}", repeat.total);
                let child = result
                    .create_child(Some(label), options, |child| {
                        next.proceed_in(context.clone(), child)
                    })
                    .await;
                let summary = child.get_descendant_summary();
                if summary.has_failed() {
                    failures += 1;
                    if best_fail.map(|best| less_bad(&summary, &best)).unwrap_or(true) {
                        best_fail = Some(summary);
                    }
                    if repeat.fail_fast && failures > repeat.max_failures {
                        debug!("{:?} stopped after {} failed repetitions", node.name(), failures);
                        break;
                    }
                } else if best_pass.is_none() {
                    best_pass = Some(summary);
                }
            }

            let reported = if failures <= repeat.max_failures {
                best_pass.or_else(|| {
                    best_fail.map(|fail| Summary {
                        count: fail.count,
                        pass: fail.count,
                        ..Summary::default()
                    })
                })
            } else {
                best_fail
            };
            if let Some(summary) = reported {
                result.override_child_summary(summary);
            }
        }
        .boxed()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RepeatPlugin;

impl Plugin for RepeatPlugin {
    fn register(&self, builder: &mut Builder) {
        builder.add_run_interceptor(
            Arc::new(Repeat),
            InterceptorOptions::order(order::REPEAT).with_id("repeat"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestError;
    use crate::testing::{find, run_suite};
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn run_counted(options: RepeatOptions, fail_on: &'static [u32]) -> (Arc<TestResult>, u32) {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = run_suite(move |s| {
            let c = c.clone();
            async move {
                s.test_with("t", NodeOptions::new().repeat(options), move |_| {
                    let c = c.clone();
                    async move {
                        let call = c.fetch_add(1, Ordering::SeqCst) + 1;
                        if fail_on.contains(&call) {
                            Err(TestError::failure(format!("call {call}")))
                        } else {
                            Ok(())
                        }
                    }
                });
            }
        })
        .await;
        let calls = calls.load(Ordering::SeqCst);
        (result, calls)
    }

    #[tokio::test]
    async fn test_repeat_all_pass() {
        let (result, calls) = run_counted(RepeatOptions::from(5), &[]).await;
        assert_eq!(calls, 5);
        assert_eq!(
            result.get_descendant_summary(),
            Summary {
                count: 1,
                pass: 1,
                ..Default::default()
            }
        );
        assert_eq!(find(&result, &["suite", "t"]).children().len(), 5);
    }

    #[tokio::test]
    async fn test_repeat_fail_fast() {
        let (result, calls) = run_counted(RepeatOptions::from(5), &[2]).await;
        assert_eq!(calls, 2);
        assert_eq!(result.get_descendant_summary().fail, 1);
        assert_eq!(result.get_descendant_summary().count, 1);
    }

    #[tokio::test]
    async fn test_repeat_tolerates_failures() {
        let options = RepeatOptions {
            total: 4,
            fail_fast: false,
            max_failures: 1,
        };
        let (result, calls) = run_counted(options, &[3]).await;
        assert_eq!(calls, 4);
        assert!(result.get_descendant_summary().is_success());

        let (result, calls) = run_counted(options, &[1, 3]).await;
        assert_eq!(calls, 4);
        assert_eq!(result.get_descendant_summary().fail, 1);
    }
}
