//! Interceptor chain
//!
//! Every node runs through the same ordered list of interceptors. Each one
//! may adjust the context, create child results, short-circuit, or wrap the
//! rest of the chain; the terminal step runs the test body or recurses into
//! the node's children.

use futures::future::{join_all, BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::trace;

use crate::config::RunnerConfig;
use crate::core::context::Context;
use crate::core::extension_store::TypedMap;
use crate::core::node::Node;
use crate::error::TestError;
use crate::models::{ChildOptions, StageOptions, TestResult};
use crate::utils::SeededRandom;

/// Well-known interceptor orders; lower runs further outside
pub mod order {
    pub const RUN_CONDITION: i32 = i32::MIN;
    pub const FOCUS: i32 = -1000;
    pub const PARAMETERISED: i32 = -400;
    pub const REPEAT: i32 = -300;
    pub const RETRY: i32 = -200;
    pub const TIMEOUT: i32 = -100;
    pub const OUTPUT_CAPTURE: i32 = -50;
    pub const MOCK_SCOPE: i32 = -40;
    pub const LIFECYCLE: i32 = 0;
    pub const TERMINAL: i32 = i32::MAX;
}

/// Middleware wrapping the execution of every node
pub trait RunInterceptor: Send + Sync {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()>;
}

struct FnInterceptor<F>(F);

impl<F> RunInterceptor for FnInterceptor<F>
where
    F: Fn(Next, Context, Arc<TestResult>, Arc<Node>) -> BoxFuture<'static, ()> + Send + Sync,
{
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        (self.0)(next, context, result, node)
    }
}

/// Interceptor from a closure
pub fn interceptor_fn<F>(f: F) -> Arc<dyn RunInterceptor>
where
    F: Fn(Next, Context, Arc<TestResult>, Arc<Node>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    Arc::new(FnInterceptor(f))
}

/// Predicate deciding whether a node should run
pub trait RunCondition: Send + Sync {
    fn should_run(&self, context: &Context, result: &TestResult, node: &Node) -> bool;
}

impl<F> RunCondition for F
where
    F: Fn(&Context, &TestResult, &Node) -> bool + Send + Sync,
{
    fn should_run(&self, context: &Context, result: &TestResult, node: &Node) -> bool {
        self(context, result, node)
    }
}

/// Deactivates the context when its condition fails
pub(crate) struct ConditionInterceptor(pub(crate) Arc<dyn RunCondition>);

impl RunInterceptor for ConditionInterceptor {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        if context.is_active() && !self.0.should_run(&context, &result, &node) {
            trace!("run condition deactivated {:?}", node.name());
            next.proceed_with(context.deactivated())
        } else {
            next.proceed()
        }
    }
}

/// Registration options of an interceptor
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterceptorOptions {
    pub order: i32,
    /// Registering the same id twice keeps only the first
    pub id: Option<String>,
}

impl InterceptorOptions {
    pub fn order(order: i32) -> Self {
        Self { order, id: None }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Shared state of one run
pub struct RunState {
    pub config: RunnerConfig,
    pub random: SeededRandom,
    pub globals: Arc<TypedMap>,
}

/// Ordered interceptors ending in the terminal step
pub struct Chain {
    interceptors: Vec<Arc<dyn RunInterceptor>>,
    state: Arc<RunState>,
}

impl Chain {
    /// Sort by order (stable), drop repeated ids, append the terminal step
    pub(crate) fn assemble(
        registered: Vec<(InterceptorOptions, Arc<dyn RunInterceptor>)>,
        state: Arc<RunState>,
    ) -> Arc<Self> {
        let mut seen = std::collections::HashSet::new();
        let mut entries: Vec<_> = registered
            .into_iter()
            .filter(|(options, _)| match &options.id {
                Some(id) => seen.insert(id.clone()),
                None => true,
            })
            .collect();
        entries.sort_by_key(|(options, _)| options.order);

        let mut interceptors: Vec<_> = entries.into_iter().map(|(_, i)| i).collect();
        interceptors.push(Arc::new(Terminal));
        Arc::new(Self {
            interceptors,
            state,
        })
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run a node's full chain against `result`, starting and completing it
    pub fn run_node(
        self: &Arc<Self>,
        node: Arc<Node>,
        context: Context,
        result: Arc<TestResult>,
    ) -> BoxFuture<'static, ()> {
        let chain = self.clone();
        async move {
            result.start();
            if let Some(stage) = node.discovery_stage() {
                result.attach_stage(stage.clone());
            }
            for error in node.discovery_errors() {
                result.record_error(error.clone());
            }
            chain.run_from(0, node, context, result.clone()).await;
            result.finish();
        }
        .boxed()
    }

    fn run_from(
        self: &Arc<Self>,
        index: usize,
        node: Arc<Node>,
        context: Context,
        result: Arc<TestResult>,
    ) -> BoxFuture<'static, ()> {
        match self.interceptors.get(index) {
            Some(interceptor) => {
                let next = Next {
                    chain: self.clone(),
                    index: index + 1,
                    node: node.clone(),
                    context: context.clone(),
                    result: result.clone(),
                };
                interceptor.clone().intercept(next, context, result, node)
            }
            None => async {}.boxed(),
        }
    }
}

/// The remainder of the chain for one node
#[derive(Clone)]
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
    node: Arc<Node>,
    context: Context,
    result: Arc<TestResult>,
}

impl Next {
    /// Continue with the current context and result
    pub fn proceed(&self) -> BoxFuture<'static, ()> {
        self.proceed_in(self.context.clone(), self.result.clone())
    }

    /// Continue with a derived context
    pub fn proceed_with(&self, context: Context) -> BoxFuture<'static, ()> {
        self.proceed_in(context, self.result.clone())
    }

    /// Continue against another result, e.g. a child created for an attempt
    pub fn proceed_in(&self, context: Context, result: Arc<TestResult>) -> BoxFuture<'static, ()> {
        self.chain
            .run_from(self.index, self.node.clone(), context, result)
    }

    /// Run a child node's full chain
    pub fn run_child(
        &self,
        node: Arc<Node>,
        context: Context,
        result: Arc<TestResult>,
    ) -> BoxFuture<'static, ()> {
        self.chain.run_node(node, context, result)
    }

    pub fn state(&self) -> &RunState {
        self.chain.state()
    }
}

/// Final step: run the test body or recurse into children
struct Terminal;

impl RunInterceptor for Terminal {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        async move {
            if let Some(body) = node.test_fn().cloned() {
                if !context.is_active() {
                    result
                        .create_stage(StageOptions::default(), "test", || async {
                            Err::<(), _>(TestError::skip("ignored"))
                        })
                        .await;
                    return;
                }
                let args = context.args().with_globals(next.state().globals.clone());
                result
                    .create_stage(StageOptions::tangible(), "test", move || body(args))
                    .await;
                return;
            }

            // Child results are created up front so the tree keeps declaration order
            let children: Vec<_> = node
                .children()
                .iter()
                .map(|child| {
                    let options = ChildOptions {
                        is_test: child.is_test(),
                        boring: false,
                    };
                    (
                        child.clone(),
                        result.add_child(child.name().map(str::to_string), options),
                    )
                })
                .collect();

            if node.is_parallel() {
                join_all(
                    children
                        .into_iter()
                        .map(|(child, r)| next.run_child(child, context.clone(), r)),
                )
                .await;
                return;
            }

            let mut order: Vec<usize> = (0..children.len()).collect();
            let state = next.state();
            if state.config.random_order && order.len() > 1 {
                let mut random = state.random.fork(&node.path().join("/"));
                random.shuffle(&mut order);
                trace!("shuffled {:?} into {:?}", node.name(), order);
            }
            for index in order {
                let (child, r) = &children[index];
                next.run_child(child.clone(), context.clone(), r.clone())
                    .await;
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn state() -> Arc<RunState> {
        Arc::new(RunState {
            config: RunnerConfig::default(),
            random: SeededRandom::new("test"),
            globals: Arc::new(TypedMap::new()),
        })
    }

    fn recording(trace: Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn RunInterceptor> {
        interceptor_fn(move |next, _, _, _| {
            let trace = trace.clone();
            async move {
                trace.lock().push(format!("enter {name}"));
                next.proceed().await;
                trace.lock().push(format!("exit {name}"));
            }
            .boxed()
        })
    }

    #[test]
    fn test_assemble_orders_and_dedupes() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::assemble(
            vec![
                (InterceptorOptions::order(10), recording(trace.clone(), "b")),
                (
                    InterceptorOptions::order(-5).with_id("a"),
                    recording(trace.clone(), "a"),
                ),
                (
                    InterceptorOptions::order(-5).with_id("a"),
                    recording(trace.clone(), "a again"),
                ),
                (InterceptorOptions::order(10), recording(trace.clone(), "c")),
            ],
            state(),
        );
        assert_eq!(chain.len(), 4);
    }

    #[tokio::test]
    async fn test_chain_nesting_follows_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::assemble(
            vec![
                (InterceptorOptions::order(10), recording(trace.clone(), "inner")),
                (InterceptorOptions::order(-10), recording(trace.clone(), "outer")),
                (InterceptorOptions::order(10), recording(trace.clone(), "innermost")),
            ],
            state(),
        );
        let node = Arc::new(Node {
            node_type: Arc::new(crate::core::node::NodeType::leaf("test")),
            options: crate::core::node::NodeOptions::named("t"),
            run: Some(crate::core::discovery::test_fn({
                let trace = trace.clone();
                move |_| {
                    let trace = trace.clone();
                    async move { trace.lock().push("body".to_string()) }
                }
            })),
            scopes: TypedMap::new(),
            children: vec![],
            parent: std::sync::Weak::new(),
            discovery: None,
            discovery_errors: vec![],
        });
        let result = TestResult::root(None);
        chain.run_node(node, Context::default(), result.clone()).await;

        assert_eq!(
            *trace.lock(),
            vec![
                "enter outer",
                "enter inner",
                "enter innermost",
                "body",
                "exit innermost",
                "exit inner",
                "exit outer"
            ]
        );
        assert!(result.is_complete());
    }
}
