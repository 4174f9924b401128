//! Lifecycle hooks
//!
//! `before_all`/`after_all` wrap every node of a block once; `before_each`/
//! `after_each` wrap each test, collected from every enclosing block. Entry
//! runs outer to inner, exit inner to outer, and a hook may hand back a
//! [`Teardown`] that runs before the declared after hooks of its level.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::core::{
    order, Builder, Context, Discovery, InterceptorOptions, Key, Next, Node, ParamKey, Plugin,
    RunInterceptor, ScopeKey, TestArgs,
};
use crate::error::TestError;
use crate::models::{IntoOutcome, StageOptions, TestResult, TestStatus};

/// Hooks declared directly on a block
pub const HOOKS: ScopeKey<Hooks> = Key::new("lifecycle hooks");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

impl HookKind {
    pub fn label(&self) -> &'static str {
        match self {
            HookKind::BeforeAll => "before all",
            HookKind::AfterAll => "after all",
            HookKind::BeforeEach => "before each",
            HookKind::AfterEach => "after each",
        }
    }

    fn is_after(&self) -> bool {
        matches!(self, HookKind::AfterAll | HookKind::AfterEach)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cleanup returned by a before hook
pub struct Teardown(Box<dyn FnOnce() -> BoxFuture<'static, Result<(), TestError>> + Send>);

impl Teardown {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
    {
        Self(Box::new(move || {
            let run = f();
            async move { run.await.into_outcome() }.boxed()
        }))
    }

    fn run(self) -> BoxFuture<'static, Result<(), TestError>> {
        (self.0)()
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Teardown(..)")
    }
}

/// Conversion of a hook's return value
pub trait IntoHookOutcome {
    fn into_hook_outcome(self) -> Result<Option<Teardown>, TestError>;
}

impl IntoHookOutcome for () {
    fn into_hook_outcome(self) -> Result<Option<Teardown>, TestError> {
        Ok(None)
    }
}

impl IntoHookOutcome for Teardown {
    fn into_hook_outcome(self) -> Result<Option<Teardown>, TestError> {
        Ok(Some(self))
    }
}

impl IntoHookOutcome for Option<Teardown> {
    fn into_hook_outcome(self) -> Result<Option<Teardown>, TestError> {
        Ok(self)
    }
}

impl<T: IntoHookOutcome, E: Into<TestError>> IntoHookOutcome for Result<T, E> {
    fn into_hook_outcome(self) -> Result<Option<Teardown>, TestError> {
        self.map_err(Into::<TestError>::into)?.into_hook_outcome()
    }
}

type HookFn = Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<Option<Teardown>, TestError>> + Send + Sync>;

#[derive(Clone)]
pub struct Hook {
    name: Option<String>,
    run: HookFn,
}

impl Hook {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn stage_label(&self, kind: HookKind) -> String {
        match &self.name {
            Some(name) => format!("{kind}: {name}"),
            None => kind.label().to_string(),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Hooks {
    pub before_all: Vec<Hook>,
    pub after_all: Vec<Hook>,
    pub before_each: Vec<Hook>,
    pub after_each: Vec<Hook>,
}

impl Hooks {
    fn of(&self, kind: HookKind) -> &[Hook] {
        match kind {
            HookKind::BeforeAll => &self.before_all,
            HookKind::AfterAll => &self.after_all,
            HookKind::BeforeEach => &self.before_each,
            HookKind::AfterEach => &self.after_each,
        }
    }

    fn push(&mut self, kind: HookKind, hook: Hook) {
        match kind {
            HookKind::BeforeAll => self.before_all.push(hook),
            HookKind::AfterAll => self.after_all.push(hook),
            HookKind::BeforeEach => self.before_each.push(hook),
            HookKind::AfterEach => self.after_each.push(hook),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before_all.is_empty()
            && self.after_all.is_empty()
            && self.before_each.is_empty()
            && self.after_each.is_empty()
    }
}

/// Handle given to a hook.
///
/// Parameters added here are visible to more nested hooks and to the test.
#[derive(Clone, Debug)]
pub struct HookContext {
    args: Arc<Mutex<TestArgs>>,
}

impl HookContext {
    fn new(args: Arc<Mutex<TestArgs>>) -> Self {
        Self { args }
    }

    /// Append a positional test parameter
    pub fn add_test_parameter(&self, value: impl Into<Value>) {
        self.args.lock().push(value.into());
    }

    /// Set a named test parameter
    pub fn set_parameter<T: Send + Sync + 'static>(&self, key: &ParamKey<T>, value: T) {
        self.args.lock().set(key, value);
    }

    pub fn get<T: Clone + 'static>(&self, key: &ParamKey<T>) -> Option<T> {
        self.args.lock().get(key).cloned()
    }

    /// Snapshot of the parameters collected so far
    pub fn args(&self) -> TestArgs {
        self.args.lock().clone()
    }
}

impl Discovery {
    pub fn before_all<F, Fut>(&self, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHookOutcome,
    {
        self.hook(HookKind::BeforeAll, None, hook)
    }

    pub fn before_each<F, Fut>(&self, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHookOutcome,
    {
        self.hook(HookKind::BeforeEach, None, hook)
    }

    pub fn after_all<F, Fut>(&self, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
    {
        self.hook(HookKind::AfterAll, None, after(hook))
    }

    pub fn after_each<F, Fut>(&self, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
    {
        self.hook(HookKind::AfterEach, None, after(hook))
    }

    /// Register a hook of any kind, optionally named.
    ///
    /// A teardown returned by an after hook runs right after it.
    pub fn hook<F, Fut>(&self, kind: HookKind, name: Option<&str>, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoHookOutcome,
    {
        let run: HookFn = Arc::new(move |ctx| {
            let run = hook(ctx);
            async move { run.await.into_hook_outcome() }.boxed()
        });
        let hook = Hook {
            name: name.map(str::to_string),
            run,
        };
        if let Err(err) = self.update_scope(&HOOKS, |hooks| hooks.push(kind, hook)) {
            self.report(err.into());
        }
    }
}

fn after<F, Fut>(hook: F) -> impl Fn(HookContext) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync + 'static
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoOutcome,
{
    move |ctx| {
        let run = hook(ctx);
        async move { run.await.into_outcome() }.boxed()
    }
}

/// Run one hook as a stage of `result`, collecting its teardown
async fn run_hook(
    result: &Arc<TestResult>,
    kind: HookKind,
    hook: &Hook,
    args: &Arc<Mutex<TestArgs>>,
    teardowns: &mut Vec<Teardown>,
) -> TestStatus {
    let mut options = StageOptions::tangible();
    if kind.is_after() {
        options = options.no_cancel();
    }
    let ctx = HookContext::new(args.clone());
    let run = hook.run.clone();
    let mut teardown = None;
    let slot = &mut teardown;
    let status = result
        .create_stage(options, hook.stage_label(kind), move || async move {
            *slot = run(ctx).await?;
            Ok::<(), TestError>(())
        })
        .await;
    if let Some(teardown) = teardown {
        teardowns.push(teardown);
    }
    status
}

/// Run teardowns last-in first-out; they always run
async fn run_teardowns(result: &Arc<TestResult>, teardowns: Vec<Teardown>) {
    for teardown in teardowns.into_iter().rev() {
        result
            .create_stage(StageOptions::tangible().no_cancel(), "teardown", move || {
                teardown.run()
            })
            .await;
    }
}

/// Before hooks of one level, stopping at the first that does not pass
async fn enter(
    result: &Arc<TestResult>,
    kind: HookKind,
    hooks: &[Hook],
    args: &Arc<Mutex<TestArgs>>,
    teardowns: &mut Vec<Teardown>,
) -> bool {
    for hook in hooks {
        let status = run_hook(result, kind, hook, args, teardowns).await;
        if status != TestStatus::Pass {
            debug!("{} hook did not pass ({}), skipping the rest", kind, status);
            return false;
        }
    }
    true
}

/// Teardowns of one level, then its after hooks
async fn exit(
    result: &Arc<TestResult>,
    kind: HookKind,
    hooks: &[Hook],
    args: &Arc<Mutex<TestArgs>>,
    teardowns: Vec<Teardown>,
) {
    run_teardowns(result, teardowns).await;
    for hook in hooks {
        let mut own = Vec::new();
        run_hook(result, kind, hook, args, &mut own).await;
        run_teardowns(result, own).await;
    }
}

struct Lifecycle;

impl Lifecycle {
    async fn run_block(next: Next, context: Context, result: Arc<TestResult>, hooks: Hooks) {
        let args = Arc::new(Mutex::new(context.args()));
        let mut teardowns = Vec::new();
        let entered = enter(&result, HookKind::BeforeAll, &hooks.before_all, &args, &mut teardowns).await;

        let inner = context.with_args(args.lock().clone());
        let inner = if entered { inner } else { inner.deactivated() };
        next.proceed_with(inner).await;

        exit(&result, HookKind::AfterAll, &hooks.after_all, &args, teardowns).await;
    }

    async fn run_test(next: Next, context: Context, result: Arc<TestResult>, node: Arc<Node>) {
        let levels: Vec<Hooks> = node
            .lineage()
            .iter()
            .filter_map(|n| n.scope(&HOOKS).cloned())
            .filter(|hooks| !hooks.before_each.is_empty() || !hooks.after_each.is_empty())
            .collect();
        let args = Arc::new(Mutex::new(context.args()));

        let mut entered: Vec<(&Hooks, Vec<Teardown>)> = Vec::new();
        let mut passed = true;
        for hooks in &levels {
            let mut teardowns = Vec::new();
            passed = enter(&result, HookKind::BeforeEach, &hooks.before_each, &args, &mut teardowns).await;
            entered.push((hooks, teardowns));
            if !passed {
                break;
            }
        }

        let inner = context.with_args(args.lock().clone());
        let inner = if passed { inner } else { inner.deactivated() };
        next.proceed_with(inner).await;

        while let Some((hooks, teardowns)) = entered.pop() {
            exit(&result, HookKind::AfterEach, &hooks.after_each, &args, teardowns).await;
        }
    }
}

impl RunInterceptor for Lifecycle {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        if !context.is_active() {
            return next.proceed();
        }
        if node.is_test() {
            return Lifecycle::run_test(next, context, result, node).boxed();
        }
        match node.scope(&HOOKS) {
            Some(hooks) if !hooks.of(HookKind::BeforeAll).is_empty() || !hooks.of(HookKind::AfterAll).is_empty() => {
                trace!("running block hooks of {:?}", node.name());
                Lifecycle::run_block(next, context, result, hooks.clone()).boxed()
            }
            _ => next.proceed(),
        }
    }
}

/// Registers the hook scope and the lifecycle interceptor
#[derive(Clone, Copy, Debug, Default)]
pub struct LifecyclePlugin;

impl Plugin for LifecyclePlugin {
    fn register(&self, builder: &mut Builder) {
        builder.add_node_scope(&HOOKS, Hooks::default).add_run_interceptor(
            Arc::new(Lifecycle),
            InterceptorOptions::order(order::LIFECYCLE).with_id("lifecycle"),
        );
    }
}
