//! Mock scope
//!
//! Mocks installed while a node runs register how to undo themselves here;
//! the registered reverts run in reverse order once the node finishes, or
//! when its abandoned chain is dropped.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

use crate::core::{
    order, Builder, Context, InterceptorOptions, Next, Node, Plugin, RunInterceptor,
};
use crate::models::TestResult;

type Revert = Box<dyn FnOnce() + Send>;

tokio::task_local! {
    static REVERTS: Arc<Mutex<Vec<Revert>>>;
}

/// Register `revert` with the running node.
///
/// Returns false outside of a run; the caller then stays responsible for it.
pub fn on_revert<F>(revert: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    REVERTS
        .try_with(move |reverts| reverts.lock().push(Box::new(revert)))
        .is_ok()
}

/// Runs the collected reverts when the node's scope ends
struct RevertOnDrop {
    reverts: Arc<Mutex<Vec<Revert>>>,
    result_id: u64,
}

impl Drop for RevertOnDrop {
    fn drop(&mut self) {
        let reverts = std::mem::take(&mut *self.reverts.lock());
        if !reverts.is_empty() {
            trace!("reverting {} mocks of result {}", reverts.len(), self.result_id);
        }
        for revert in reverts.into_iter().rev() {
            revert();
        }
    }
}

struct MockScope;

impl RunInterceptor for MockScope {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        _context: Context,
        result: Arc<TestResult>,
        _node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        async move {
            let guard = RevertOnDrop {
                reverts: Arc::new(Mutex::new(Vec::new())),
                result_id: result.id(),
            };
            REVERTS.scope(guard.reverts.clone(), next.proceed()).await;
            drop(guard);
        }
        .boxed()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MockScopePlugin;

impl Plugin for MockScopePlugin {
    fn register(&self, builder: &mut Builder) {
        builder.add_run_interceptor(
            Arc::new(MockScope),
            InterceptorOptions::order(order::MOCK_SCOPE).with_id("mock scope"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entries, record, run_suite, trace};
    use crate::plugins::lifecycle::Teardown;
    use futures::future;

    #[test]
    fn test_outside_run_is_not_registered() {
        assert!(!on_revert(|| {}));
    }

    #[tokio::test]
    async fn test_reverts_run_in_reverse_after_node() {
        let trace = trace();
        let t = trace.clone();
        run_suite(move |s| {
            let t = t.clone();
            async move {
                let body = t.clone();
                s.test("a", move |_| {
                    let t = body.clone();
                    async move {
                        for name in ["first", "second"] {
                            let t2 = t.clone();
                            assert!(on_revert(move || record(&t2, format!("revert {name}"))));
                        }
                        record(&t, "body done");
                    }
                });
                let next = t.clone();
                s.test("b", move |_| {
                    let t = next.clone();
                    async move { record(&t, "b") }
                });
            }
        })
        .await;

        assert_eq!(
            entries(&trace),
            vec!["body done", "revert second", "revert first", "b"]
        );
    }

    #[tokio::test]
    async fn test_reverts_run_when_scope_is_dropped() {
        let trace = trace();
        let t = trace.clone();
        run_suite(move |s| {
            let t = t.clone();
            async move {
                s.before_each(|_| async { Teardown::new(|| future::pending::<()>()) });
                s.test_with(
                    "hangs",
                    crate::core::NodeOptions::new().timeout_ms(10),
                    move |_| {
                        let t = t.clone();
                        async move {
                            assert!(on_revert(move || record(&t, "reverted")));
                            future::pending::<()>().await;
                        }
                    },
                );
            }
        })
        .await;
        assert_eq!(entries(&trace), vec!["reverted"]);
    }
}
