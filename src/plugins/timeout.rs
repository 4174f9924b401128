//! Timeout
//!
//! Races a node's chain against a timer. When the timer wins the node is
//! cancelled with a "timed out" error: the in-flight stage is abandoned and
//! only teardown stages still run. Teardown gets as long again as the limit;
//! after that the chain is dropped and unfinished descendants are completed
//! as cancelled.

use futures::future::{self, BoxFuture, Either, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::core::{
    order, Builder, Context, InterceptorOptions, Key, Next, Node, NodeOptions, OptionKey, Plugin,
    RunInterceptor,
};
use crate::error::TestError;
use crate::models::TestResult;

pub const TIMEOUT: OptionKey<Duration> = Key::new("timeout");

impl NodeOptions {
    pub fn timeout(self, timeout: Duration) -> Self {
        self.with(&TIMEOUT, timeout)
    }

    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }
}

struct Timeout {
    /// Applied to tests without a timeout of their own
    default: Option<Duration>,
}

impl Timeout {
    fn limit(&self, node: &Node) -> Option<Duration> {
        node.options()
            .get(&TIMEOUT)
            .copied()
            .or_else(|| self.default.filter(|_| node.is_test()))
    }
}

impl RunInterceptor for Timeout {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        let limit = match self.limit(&node) {
            Some(limit) if context.is_active() => limit,
            _ => return next.proceed(),
        };

        async move {
            let timer = Box::pin(tokio::time::sleep(limit));
            if let Either::Right(((), chain)) = future::select(next.proceed(), timer).await {
                warn!("{:?} timed out after {}ms", node.name(), limit.as_millis());
                result.cancel(TestError::error(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                )));
                if tokio::time::timeout(limit, chain).await.is_err() {
                    warn!("{:?} teardown did not finish, abandoning it", node.name());
                    result.abandon_descendants();
                }
            }
        }
        .boxed()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TimeoutPlugin {
    pub default: Option<Duration>,
}

impl Plugin for TimeoutPlugin {
    fn register(&self, builder: &mut Builder) {
        builder.add_run_interceptor(
            Arc::new(Timeout {
                default: self.default,
            }),
            InterceptorOptions::order(order::TIMEOUT).with_id("timeout"),
        );
    }
}
