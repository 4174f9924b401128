//! Builder and runner
//!
//! Plugins register node types, options, scopes, globals and interceptors
//! into the builder's extension store. `build` freezes the store, runs
//! discovery, and yields a `Runner` that can execute the tree.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::core::context::{Context, RANDOM_SEED};
use crate::core::discovery::{
    discover, discovery_fn, freeze, Discovery, DiscoveryEnv, IntoDiscovered, OptionPreset,
    PendingNode, ScopeInit,
};
use crate::core::extension_store::{
    ExtensionKey, ExtensionStore, GlobalKey, Key, ScopeKey, TypedMap,
};
use crate::core::interceptor::{
    order, Chain, ConditionInterceptor, InterceptorOptions, RunInterceptor, RunState,
};
use crate::core::node::{
    DiscoveryFn, Node, NodeBody, NodeOptions, NodeType, ROOT_TYPE, SUITE_TYPE,
};
use crate::events::Listener;
use crate::models::TestResult;
use crate::utils::{SeededRandom, Timer};

/// A unit of builder configuration
pub trait Plugin {
    fn register(&self, builder: &mut Builder);
}

impl<F> Plugin for F
where
    F: Fn(&mut Builder),
{
    fn register(&self, builder: &mut Builder) {
        self(builder)
    }
}

#[derive(Clone)]
struct Suite {
    name: String,
    options: NodeOptions,
    content: DiscoveryFn,
}

type Registered = (InterceptorOptions, Arc<dyn RunInterceptor>);

const NODE_TYPES: ExtensionKey<Arc<NodeType>> = Key::new("node types");
const NODE_OPTIONS: ExtensionKey<(String, OptionPreset)> = Key::new("node options");
const NODE_SCOPES: ExtensionKey<ScopeInit> = Key::new("node scopes");
const CONTEXT_SCOPES: ExtensionKey<ScopeInit> = Key::new("context scopes");
const GLOBALS: ExtensionKey<ScopeInit> = Key::new("globals");
const RUN_INTERCEPTORS: ExtensionKey<Registered> = Key::new("run interceptors");
const SUITES: ExtensionKey<Suite> = Key::new("suites");

/// Accumulates plugin contributions and suites
pub struct Builder {
    config: RunnerConfig,
    extensions: ExtensionStore,
}

impl Builder {
    pub fn new(config: RunnerConfig) -> Self {
        let mut builder = Self {
            config,
            extensions: ExtensionStore::new(),
        };
        builder
            .add_node_type(NodeType::block(ROOT_TYPE, "test", "describe"))
            .add_node_type(NodeType::block(SUITE_TYPE, "test", "describe"));
        builder
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn add_plugin(&mut self, plugin: impl Plugin) -> &mut Self {
        plugin.register(self);
        self
    }

    /// Contribute to an arbitrary extension point
    pub fn extend<T: Send + Sync + 'static>(&mut self, key: &ExtensionKey<T>, value: T) -> &mut Self {
        self.extensions.add(key, value);
        self
    }

    pub fn extensions(&self) -> &ExtensionStore {
        &self.extensions
    }

    /// Later registrations of the same key replace earlier ones
    pub fn add_node_type(&mut self, node_type: NodeType) -> &mut Self {
        self.extend(&NODE_TYPES, Arc::new(node_type))
    }

    /// Named option preset usable through `Discovery::preset`
    pub fn add_node_option<F>(&mut self, name: impl Into<String>, preset: F) -> &mut Self
    where
        F: Fn(NodeOptions) -> NodeOptions + Send + Sync + 'static,
    {
        let preset: OptionPreset = Arc::new(preset);
        self.extend(&NODE_OPTIONS, (name.into(), preset))
    }

    /// Per-node plugin state, initialized for every node
    pub fn add_node_scope<T, F>(&mut self, key: &ScopeKey<T>, init: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let key = *key;
        let init: ScopeInit = Arc::new(move |scopes: &mut TypedMap| scopes.insert(&key, init()));
        self.extend(&NODE_SCOPES, init)
    }

    /// Initial value of plugin state carried in the run context
    pub fn add_context_scope<T, F>(&mut self, key: &ScopeKey<T>, init: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let key = *key;
        let init: ScopeInit = Arc::new(move |values: &mut TypedMap| values.insert(&key, init()));
        self.extend(&CONTEXT_SCOPES, init)
    }

    /// Value reachable from discovery and from test arguments
    pub fn add_global<T>(&mut self, key: &GlobalKey<T>, value: T) -> &mut Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let key = *key;
        let init: ScopeInit =
            Arc::new(move |globals: &mut TypedMap| globals.insert(&key, value.clone()));
        self.extend(&GLOBALS, init)
    }

    pub fn add_run_interceptor(
        &mut self,
        interceptor: Arc<dyn RunInterceptor>,
        options: InterceptorOptions,
    ) -> &mut Self {
        self.extend(&RUN_INTERCEPTORS, (options, interceptor))
    }

    /// Deactivate the context for nodes failing `condition`
    pub fn add_run_condition<F>(&mut self, condition: F) -> &mut Self
    where
        F: Fn(&Context, &TestResult, &Node) -> bool + Send + Sync + 'static,
    {
        self.add_run_interceptor(
            Arc::new(ConditionInterceptor(Arc::new(condition))),
            InterceptorOptions::order(order::RUN_CONDITION),
        )
    }

    pub fn add_suite<F, Fut>(&mut self, name: impl Into<String>, content: F) -> &mut Self
    where
        F: Fn(Discovery) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoDiscovered,
    {
        self.add_suite_with(name, NodeOptions::new(), content)
    }

    pub fn add_suite_with<F, Fut>(
        &mut self,
        name: impl Into<String>,
        options: NodeOptions,
        content: F,
    ) -> &mut Self
    where
        F: Fn(Discovery) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoDiscovered,
    {
        let suite = Suite {
            name: name.into(),
            options,
            content: discovery_fn(content),
        };
        self.extend(&SUITES, suite)
    }

    /// Freeze the configuration and discover every suite
    pub async fn build(self) -> Runner {
        let Builder { config, extensions } = self;
        let extensions = extensions.freeze();

        let random = config
            .random_seed
            .clone()
            .map(SeededRandom::new)
            .unwrap_or_else(SeededRandom::from_entropy);

        let mut globals = TypedMap::new();
        globals.insert(&RANDOM_SEED, random.seed().to_string());
        for init in extensions.get(&GLOBALS) {
            init(&mut globals);
        }
        let globals = Arc::new(globals);

        let node_types: HashMap<String, Arc<NodeType>> = extensions
            .get(&NODE_TYPES)
            .into_iter()
            .map(|t| (t.key().to_string(), t.clone()))
            .collect();
        let presets: HashMap<String, OptionPreset> = extensions
            .get(&NODE_OPTIONS)
            .into_iter()
            .map(|(name, preset)| (name.clone(), preset.clone()))
            .collect();
        let env = Arc::new(DiscoveryEnv {
            node_types,
            presets,
            scope_inits: extensions.get(&NODE_SCOPES).into_iter().cloned().collect(),
            globals: globals.clone(),
            parallel: config.parallel_discovery,
        });

        let root_type = env
            .node_types
            .get(ROOT_TYPE)
            .cloned()
            .unwrap_or_else(|| Arc::new(NodeType::block(ROOT_TYPE, "test", "describe")));
        let root = Arc::new(PendingNode::new(
            root_type,
            NodeOptions::new().parallel(config.parallel_suites),
            None,
            &env,
        ));
        let handle = Discovery::new(root.clone(), env.clone());
        for suite in extensions.get(&SUITES) {
            handle.add_node(
                SUITE_TYPE,
                suite.name.clone(),
                suite.options.clone(),
                NodeBody::Block(suite.content.clone()),
            );
        }

        let timer = Timer::start("discovery");
        discover(root.clone(), env).await;
        let root = freeze(&root, Weak::new());
        info!(
            "Discovered {} tests in {}ms",
            root.test_count(),
            timer.elapsed_ms()
        );

        let mut context = TypedMap::new();
        for init in extensions.get(&CONTEXT_SCOPES) {
            init(&mut context);
        }

        let interceptors: Vec<Registered> = extensions
            .get(&RUN_INTERCEPTORS)
            .into_iter()
            .cloned()
            .collect();
        debug!("{} run interceptors registered", interceptors.len());
        let chain = Chain::assemble(
            interceptors,
            Arc::new(RunState {
                config,
                random,
                globals,
            }),
        );

        Runner {
            root,
            chain,
            context: Context::new(context),
        }
    }
}

/// Executes a discovered tree
pub struct Runner {
    root: Arc<Node>,
    chain: Arc<Chain>,
    context: Context,
}

impl Runner {
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.chain.state().config
    }

    /// Seed that orders this run; reuse it to reproduce a shuffled run
    pub fn seed(&self) -> &str {
        self.chain.state().random.seed()
    }

    /// Run every discovered suite, streaming events to `listener`
    pub async fn run(&self, listener: Option<Arc<dyn Listener>>) -> Arc<TestResult> {
        info!(
            "Running {} tests (seed {})",
            self.root.test_count(),
            self.seed()
        );
        let timer = Timer::start("run");
        let result = TestResult::root(listener);
        self.chain
            .run_node(self.root.clone(), self.context.clone(), result.clone())
            .await;

        let summary = result.get_descendant_summary();
        info!("{} in {}ms", summary, timer.elapsed_ms());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::discovery::test_fn;
    use crate::models::{Summary, TestStatus};
    use crate::error::TestError;

    const WHO: GlobalKey<String> = Key::new("who");

    fn bare() -> Builder {
        let mut builder = Builder::new(RunnerConfig {
            random_seed: Some("fixed".into()),
            ..Default::default()
        });
        builder
            .add_node_type(NodeType::block("describe", "test", "describe"))
            .add_node_type(NodeType::leaf("test"));
        builder
    }

    #[tokio::test]
    async fn test_build_and_run_suites() {
        let mut builder = bare();
        builder.add_global(&WHO, "world".to_string());
        builder.add_suite("greeting", |s: Discovery| async move {
            assert_eq!(s.global(&WHO).map(String::as_str), Some("world"));
            s.add_node(
                "test",
                "passes",
                NodeOptions::new(),
                NodeBody::Test(test_fn(|args| async move {
                    assert_eq!(args.global(&WHO).map(String::as_str), Some("world"));
                    assert_eq!(args.seed(), Some("fixed"));
                })),
            );
            s.add_node(
                "test",
                "fails",
                NodeOptions::new(),
                NodeBody::Test(test_fn(|_| async { Err::<(), _>(TestError::failure("no")) })),
            );
        });

        let runner = builder.build().await;
        assert_eq!(runner.seed(), "fixed");
        assert_eq!(runner.root().test_count(), 2);

        let result = runner.run(None).await;
        let summary = result.get_descendant_summary();
        assert_eq!(
            summary,
            Summary {
                count: 2,
                pass: 1,
                fail: 1,
                ..Default::default()
            }
        );
        let suite = &result.children()[0];
        assert_eq!(suite.label(), Some("greeting"));
        assert_eq!(suite.children()[1].status(), TestStatus::Fail);
    }

    #[tokio::test]
    async fn test_run_condition_deactivates() {
        let mut builder = bare();
        builder.add_run_condition(|_: &Context, _: &TestResult, node: &Node| {
            node.name() != Some("skipped")
        });
        builder.add_suite("s", |s: Discovery| async move {
            for name in ["kept", "skipped"] {
                s.add_node(
                    "test",
                    name,
                    NodeOptions::new(),
                    NodeBody::Test(test_fn(|_| async {})),
                );
            }
        });

        let result = builder.build().await.run(None).await;
        let summary = result.get_descendant_summary();
        assert_eq!(summary.pass, 1);
        assert_eq!(summary.skip, 1);
        let skipped = &result.children()[0].children()[1];
        assert_eq!(skipped.skip_reasons()[0].message, "ignored");
    }

    #[tokio::test]
    async fn test_function_plugin() {
        let mut builder = bare();
        builder.add_plugin(|b: &mut Builder| {
            b.add_node_type(NodeType::leaf("check"));
        });
        builder.add_suite("s", |s: Discovery| async move {
            s.add_node(
                "check",
                "c",
                NodeOptions::new(),
                NodeBody::Test(test_fn(|_| async {})),
            );
        });
        let runner = builder.build().await;
        assert!(runner.root().find(&["s", "c"]).unwrap().is_test());
    }
}
