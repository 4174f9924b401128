//! Retry
//!
//! Re-runs a node up to N times, each attempt against its own boring child
//! result, until an attempt does not fail. Only the last attempt counts.

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::debug;

use crate::core::{
    order, Builder, Context, InterceptorOptions, Key, Next, Node, NodeOptions, OptionKey, Plugin,
    RunInterceptor,
};
use crate::models::{ChildOptions, TestResult};

/// Maximum number of attempts
pub const RETRY: OptionKey<u32> = Key::new("retry");

impl NodeOptions {
    pub fn retry(self, attempts: u32) -> Self {
        self.with(&RETRY, attempts)
    }
}

struct Retry;

impl RunInterceptor for Retry {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        let attempts = node.options().get(&RETRY).copied().unwrap_or(0);
        if !context.is_active() || attempts <= 1 {
            return next.proceed();
        }

        async move {
            let options = ChildOptions {
                is_test: node.is_test(),
                boring: true,
            };
            let mut previous: Option<Arc<TestResult>> = None;
            for attempt in 1..=attempts {
                // A cancelled first attempt still records its outcome
                if attempt > 1 && result.is_cancelled() {
                    break;
                }
                let label = format!("attempt {attempt} of {attempts}");
                let link = previous.clone();
                let child = result
                    .create_child(Some(label), options, |child| {
                        if let Some(link) = link {
                            child.set_previous(link);
                        }
                        next.proceed_in(context.clone(), child)
                    })
                    .await;
                let failed = child.has_failed();
                previous = Some(child);
                if !failed {
                    break;
                }
                debug!("{:?} failed attempt {} of {}", node.name(), attempt, attempts);
            }
            if let Some(last) = previous {
                result.override_child_summary(last.get_descendant_summary());
            }
        }
        .boxed()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RetryPlugin;

impl Plugin for RetryPlugin {
    fn register(&self, builder: &mut Builder) {
        builder.add_run_interceptor(
            Arc::new(Retry),
            InterceptorOptions::order(order::RETRY).with_id("retry"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestError;
    use crate::models::{Summary, TestStatus};
    use crate::testing::{entries, find, record, run_suite, trace};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_until_pass() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = run_suite(move |s| {
            let c = c.clone();
            async move {
                s.test_with("t", NodeOptions::new().retry(3), move |_| {
                    let c = c.clone();
                    async move {
                        if c.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(TestError::failure("flaky"))
                        } else {
                            Ok(())
                        }
                    }
                });
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.get_descendant_summary(),
            Summary {
                count: 1,
                pass: 1,
                ..Default::default()
            }
        );
        let t = find(&result, &["suite", "t"]);
        let attempts = t.children();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].status(), TestStatus::Fail);
        assert_eq!(attempts[1].status(), TestStatus::Fail);
        assert_eq!(attempts[2].status(), TestStatus::Pass);
        assert!(attempts.iter().all(|a| a.is_boring()));
        assert_eq!(attempts[2].label(), Some("attempt 3 of 3"));
        assert!(attempts[2].previous().is_some());
    }

    #[tokio::test]
    async fn test_always_failing_counts_once() {
        let result = run_suite(|s| async move {
            s.test_with("t", NodeOptions::new().retry(4), |_| async {
                Err::<(), _>(TestError::error("always"))
            });
        })
        .await;

        assert_eq!(
            result.get_descendant_summary(),
            Summary {
                count: 1,
                error: 1,
                ..Default::default()
            }
        );
        assert_eq!(find(&result, &["suite", "t"]).children().len(), 4);
    }

    #[tokio::test]
    async fn test_hooks_rerun_per_attempt() {
        let trace = trace();
        let t = trace.clone();
        run_suite(move |s| {
            let t = t.clone();
            async move {
                let all = t.clone();
                s.before_all(move |_| {
                    let t = all.clone();
                    async move { record(&t, "before all") }
                });
                let each = t.clone();
                s.before_each(move |_| {
                    let t = each.clone();
                    async move { record(&t, "before each") }
                });
                s.test_with("t", NodeOptions::new().retry(2), |_| async {
                    Err::<(), _>(TestError::failure("no"))
                });
            }
        })
        .await;

        assert_eq!(
            entries(&trace),
            vec!["before all", "before each", "before each"]
        );
    }
}
