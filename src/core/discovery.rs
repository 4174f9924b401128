//! Discovery pass
//!
//! Expands registered suites into the node tree. Every discovery function
//! receives a [`Discovery`] handle bound to its own node, so concurrently
//! discovered siblings never share a "current node".

use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::core::context::TestArgs;
use crate::core::extension_store::{GlobalKey, ScopeKey, TypedMap};
use crate::core::node::{DiscoveryFn, Node, NodeBody, NodeOptions, NodeShape, NodeType, TestFn};
use crate::error::{EngineError, TestError};
use crate::models::{IntoOutcome, ResultStage, StageOptions};

/// Function applied to the options of nodes registered through a preset
pub type OptionPreset = Arc<dyn Fn(NodeOptions) -> NodeOptions + Send + Sync>;

/// Initializer of per-node plugin state
pub type ScopeInit = Arc<dyn Fn(&mut TypedMap) + Send + Sync>;

/// Value a discovery function resolves to
pub enum Discovered {
    /// Everything was registered through the handle
    Done,
    /// Declarative content to register
    Entries(Entries),
    /// Content is produced by another discovery function
    Defer(DiscoveryFn),
}

impl From<()> for Discovered {
    fn from(_: ()) -> Self {
        Discovered::Done
    }
}

impl From<Entries> for Discovered {
    fn from(entries: Entries) -> Self {
        Discovered::Entries(entries)
    }
}

/// Conversion of a discovery function's return value
pub trait IntoDiscovered {
    fn into_discovered(self) -> Result<Discovered, TestError>;
}

impl IntoDiscovered for () {
    fn into_discovered(self) -> Result<Discovered, TestError> {
        Ok(Discovered::Done)
    }
}

impl IntoDiscovered for Discovered {
    fn into_discovered(self) -> Result<Discovered, TestError> {
        Ok(self)
    }
}

impl IntoDiscovered for Entries {
    fn into_discovered(self) -> Result<Discovered, TestError> {
        Ok(Discovered::Entries(self))
    }
}

impl<T: IntoDiscovered, E: Into<TestError>> IntoDiscovered for Result<T, E> {
    fn into_discovered(self) -> Result<Discovered, TestError> {
        self.map_err(Into::<TestError>::into)?.into_discovered()
    }
}

/// One named value of declarative content
#[derive(Clone)]
pub enum Entry {
    /// Registered through the block's test type
    Test(TestFn),
    /// Registered through the block's sub-block type
    Block(Entries),
    /// Anything else; rejected as an invalid test
    Value(serde_json::Value),
}

/// Ordered, named declarative content of a block
#[derive(Clone, Default)]
pub struct Entries {
    items: Vec<(String, Entry)>,
}

impl Entries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn test<F, Fut>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TestArgs) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
    {
        self.items.push((name.into(), Entry::Test(test_fn(body))));
        self
    }

    pub fn block(mut self, name: impl Into<String>, entries: Entries) -> Self {
        self.items.push((name.into(), Entry::Block(entries)));
        self
    }

    pub fn value(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.items.push((name.into(), Entry::Value(value)));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Box a test body
pub fn test_fn<F, Fut>(body: F) -> TestFn
where
    F: Fn(TestArgs) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoOutcome,
{
    Arc::new(move |args| {
        let run = body(args);
        async move { run.await.into_outcome() }.boxed()
    })
}

/// Box a discovery function
pub fn discovery_fn<F, Fut>(content: F) -> DiscoveryFn
where
    F: Fn(Discovery) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoDiscovered,
{
    Arc::new(move |discovery| {
        let run = content(discovery);
        async move { run.await.into_discovered() }.boxed()
    })
}

fn entries_fn(entries: Entries) -> DiscoveryFn {
    Arc::new(move |_| {
        let entries = entries.clone();
        async move { Ok(Discovered::Entries(entries)) }.boxed()
    })
}

/// Registries consulted while discovering
pub(crate) struct DiscoveryEnv {
    pub(crate) node_types: HashMap<String, Arc<NodeType>>,
    pub(crate) presets: HashMap<String, OptionPreset>,
    pub(crate) scope_inits: Vec<ScopeInit>,
    pub(crate) globals: Arc<TypedMap>,
    pub(crate) parallel: bool,
}

#[derive(Default)]
struct PendingState {
    children: Vec<Arc<PendingNode>>,
    scopes: TypedMap,
    stage: Option<ResultStage>,
    errors: Vec<TestError>,
}

/// Node under construction; sealed once its subtree is discovered
pub(crate) struct PendingNode {
    node_type: Arc<NodeType>,
    options: NodeOptions,
    run: Option<TestFn>,
    content: Mutex<Option<DiscoveryFn>>,
    state: Mutex<PendingState>,
    open: AtomicBool,
}

impl PendingNode {
    pub(crate) fn new(
        node_type: Arc<NodeType>,
        options: NodeOptions,
        body: Option<NodeBody>,
        env: &DiscoveryEnv,
    ) -> Self {
        let mut scopes = TypedMap::new();
        for init in &env.scope_inits {
            init(&mut scopes);
        }
        let (run, content) = match body {
            Some(NodeBody::Test(run)) => (Some(run), None),
            Some(NodeBody::Block(content)) => (None, Some(content)),
            None => (None, None),
        };
        Self {
            node_type,
            options,
            run,
            content: Mutex::new(content),
            state: Mutex::new(PendingState {
                scopes,
                ..PendingState::default()
            }),
            open: AtomicBool::new(true),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn label(&self) -> &str {
        self.options.name().unwrap_or(self.node_type.key())
    }
}

/// Registration handle bound to one node
#[derive(Clone)]
pub struct Discovery {
    node: Arc<PendingNode>,
    env: Arc<DiscoveryEnv>,
    presets: Vec<OptionPreset>,
}

impl Discovery {
    pub(crate) fn new(node: Arc<PendingNode>, env: Arc<DiscoveryEnv>) -> Self {
        Self {
            node,
            env,
            presets: Vec::new(),
        }
    }

    /// Name of the node this handle registers into
    pub fn node_name(&self) -> Option<&str> {
        self.node.options.name()
    }

    /// Register a child node
    pub fn try_add_node(
        &self,
        type_key: &str,
        name: impl Into<String>,
        options: NodeOptions,
        body: NodeBody,
    ) -> Result<(), EngineError> {
        let name = name.into();
        let node_type = self
            .env
            .node_types
            .get(type_key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownNodeType(type_key.to_string()))?;
        let fits = matches!(
            (node_type.shape(), &body),
            (NodeShape::Block { .. }, NodeBody::Block(_)) | (NodeShape::Leaf, NodeBody::Test(_))
        );
        if !fits {
            return Err(EngineError::BodyMismatch(type_key.to_string()));
        }

        let options = self
            .presets
            .iter()
            .fold(options, |options, preset| preset(options))
            .with_name(name.clone());
        let child = Arc::new(PendingNode::new(node_type, options, Some(body), &self.env));

        let mut state = self.node.state.lock();
        if !self.node.is_open() {
            return Err(EngineError::DiscoveryClosed(name));
        }
        state.children.push(child);
        Ok(())
    }

    /// Register a child node, recording misuse as a discovery error
    pub fn add_node(&self, type_key: &str, name: impl Into<String>, options: NodeOptions, body: NodeBody) {
        if let Err(err) = self.try_add_node(type_key, name, options, body) {
            self.report(err.into());
        }
    }

    /// Handle whose registrations get the named option preset applied
    pub fn preset(&self, name: &str) -> Discovery {
        let mut handle = self.clone();
        match self.env.presets.get(name) {
            Some(preset) => handle.presets.push(preset.clone()),
            None => self.report(EngineError::UnknownPreset(name.to_string()).into()),
        }
        handle
    }

    /// Update plugin state held by this node
    pub fn update_scope<T, F>(&self, key: &ScopeKey<T>, update: F) -> Result<(), EngineError>
    where
        T: Clone + Default + Send + Sync + 'static,
        F: FnOnce(&mut T),
    {
        let mut state = self.node.state.lock();
        if !self.node.is_open() {
            return Err(EngineError::DiscoveryClosed(key.name().to_string()));
        }
        state.scopes.update(key, update);
        Ok(())
    }

    /// Current value of plugin state held by this node
    pub fn scope<T: Clone + 'static>(&self, key: &ScopeKey<T>) -> Option<T> {
        self.node.state.lock().scopes.get(key).cloned()
    }

    pub fn global<T: 'static>(&self, key: &GlobalKey<T>) -> Option<&T> {
        self.env.globals.get(key)
    }

    /// Record an error against this node's discovery
    pub fn report(&self, error: TestError) {
        let mut state = self.node.state.lock();
        if self.node.is_open() {
            debug!("discovery error in '{}': {}", self.node.label(), error);
            state.errors.push(error);
        } else {
            warn!(
                "discovery error after '{}' was sealed: {}",
                self.node.label(),
                error
            );
        }
    }

    fn register_entries(&self, entries: Entries) -> Result<(), EngineError> {
        let (test, sub) = match self.node.node_type.shape() {
            NodeShape::Block { test, sub } => (test.clone(), sub.clone()),
            NodeShape::Leaf => {
                return Err(EngineError::BodyMismatch(
                    self.node.node_type.key().to_string(),
                ))
            }
        };
        for (name, entry) in entries.items {
            match entry {
                Entry::Test(body) => {
                    self.try_add_node(&test, name, NodeOptions::new(), NodeBody::Test(body))?
                }
                Entry::Block(entries) => self.try_add_node(
                    &sub,
                    name,
                    NodeOptions::new(),
                    NodeBody::Block(entries_fn(entries)),
                )?,
                Entry::Value(_) => return Err(EngineError::InvalidTest(name)),
            }
        }
        Ok(())
    }
}

/// Run discovery for `node` and, afterwards, its whole subtree
pub(crate) fn discover(node: Arc<PendingNode>, env: Arc<DiscoveryEnv>) -> BoxFuture<'static, ()> {
    async move {
        let content = node.content.lock().take();
        if let Some(content) = content {
            let handle = Discovery::new(node.clone(), env.clone());
            let stage = ResultStage::run("discovery", StageOptions::default(), || async move {
                let mut outcome = content(handle.clone()).await?;
                loop {
                    match outcome {
                        Discovered::Done => break,
                        Discovered::Entries(entries) => {
                            handle.register_entries(entries)?;
                            break;
                        }
                        Discovered::Defer(next) => outcome = next(handle.clone()).await?,
                    }
                }
                Ok::<(), TestError>(())
            })
            .await;
            if let Some(err) = stage.errors().first() {
                debug!("discovery of '{}' failed: {}", node.label(), err);
            }
            node.state.lock().stage = Some(stage);
        }

        // Children may still be appended while earlier ones are discovered
        let mut discovered = 0;
        loop {
            let batch: Vec<_> = node.state.lock().children[discovered..].to_vec();
            if batch.is_empty() {
                break;
            }
            discovered += batch.len();
            if env.parallel {
                join_all(batch.into_iter().map(|c| discover(c, env.clone()))).await;
            } else {
                for child in batch {
                    discover(child, env.clone()).await;
                }
            }
        }
        node.open.store(false, Ordering::SeqCst);
    }
    .boxed()
}

/// Convert a sealed subtree into frozen nodes
pub(crate) fn freeze(node: &PendingNode, parent: Weak<Node>) -> Arc<Node> {
    let state = std::mem::take(&mut *node.state.lock());
    Arc::new_cyclic(|me| Node {
        node_type: node.node_type.clone(),
        options: node.options.clone(),
        run: node.run.clone(),
        scopes: state.scopes,
        children: state
            .children
            .iter()
            .map(|child| freeze(child, me.clone()))
            .collect(),
        parent,
        discovery: state.stage,
        discovery_errors: state.errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extension_store::Key;
    use crate::core::node::{ROOT_TYPE, SUITE_TYPE};
    use crate::models::TestStatus;

    const SEEN: ScopeKey<Vec<String>> = Key::new("seen");

    fn env(parallel: bool) -> Arc<DiscoveryEnv> {
        let mut node_types = HashMap::new();
        for node_type in [
            NodeType::block(ROOT_TYPE, "test", "describe"),
            NodeType::block(SUITE_TYPE, "test", "describe"),
            NodeType::block("describe", "test", "describe"),
            NodeType::leaf("test"),
        ] {
            node_types.insert(node_type.key().to_string(), Arc::new(node_type));
        }
        let seen_init: ScopeInit = Arc::new(|scopes: &mut TypedMap| scopes.insert(&SEEN, Vec::new()));
        let mut presets: HashMap<String, OptionPreset> = HashMap::new();
        presets.insert("parallel".into(), Arc::new(|o: NodeOptions| o.parallel(true)));
        Arc::new(DiscoveryEnv {
            node_types,
            presets,
            scope_inits: vec![seen_init],
            globals: Arc::new(TypedMap::new()),
            parallel,
        })
    }

    async fn run(env: Arc<DiscoveryEnv>, content: DiscoveryFn) -> Arc<Node> {
        let root = Arc::new(PendingNode::new(
            env.node_types[ROOT_TYPE].clone(),
            NodeOptions::new(),
            None,
            &env,
        ));
        Discovery::new(root.clone(), env.clone()).add_node(
            SUITE_TYPE,
            "suite",
            NodeOptions::new(),
            NodeBody::Block(content),
        );
        discover(root.clone(), env).await;
        freeze(&root, Weak::new())
    }

    fn leaf() -> NodeBody {
        NodeBody::Test(test_fn(|_| async {}))
    }

    fn names(node: &Node) -> Vec<String> {
        node.children()
            .iter()
            .filter_map(|c| c.name().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_nested_registration_keeps_declaration_order() {
        for parallel in [false, true] {
            let root = run(
                env(parallel),
                discovery_fn(|s: Discovery| async move {
                    for name in ["a", "b"] {
                        s.add_node(
                            "describe",
                            name,
                            NodeOptions::new(),
                            NodeBody::Block(discovery_fn(move |s: Discovery| async move {
                                tokio::task::yield_now().await;
                                s.add_node("test", format!("{name}1"), NodeOptions::new(), leaf());
                                s.add_node("test", format!("{name}2"), NodeOptions::new(), leaf());
                            })),
                        );
                    }
                }),
            )
            .await;

            let suite = root.find(&["suite"]).unwrap();
            assert_eq!(names(suite), vec!["a", "b"]);
            assert_eq!(names(suite.find(&["a"]).unwrap()), vec!["a1", "a2"]);
            assert_eq!(names(suite.find(&["b"]).unwrap()), vec!["b1", "b2"]);
            assert_eq!(root.test_count(), 4);
        }
    }

    #[tokio::test]
    async fn test_entries_and_deferred_content() {
        let root = run(
            env(false),
            discovery_fn(|_| async {
                let inner = discovery_fn(|_| async {
                    Entries::new()
                        .test("t1", |_| async {})
                        .block("group", Entries::new().test("t2", |_| async {}))
                });
                Discovered::Defer(inner)
            }),
        )
        .await;

        let suite = root.find(&["suite"]).unwrap();
        assert_eq!(names(suite), vec!["t1", "group"]);
        assert!(suite.find(&["t1"]).unwrap().is_test());
        assert!(suite.find(&["group", "t2"]).unwrap().is_test());
        assert_eq!(
            suite.discovery_stage().unwrap().status(),
            TestStatus::Pass
        );
    }

    #[tokio::test]
    async fn test_invalid_entry_fails_discovery() {
        let root = run(
            env(false),
            discovery_fn(|_| async {
                Entries::new()
                    .test("ok", |_| async {})
                    .value("bad", serde_json::json!(3))
            }),
        )
        .await;

        let suite = root.find(&["suite"]).unwrap();
        let stage = suite.discovery_stage().unwrap();
        assert_eq!(stage.status(), TestStatus::Error);
        assert_eq!(stage.errors()[0].message, "invalid test 'bad'");
        assert_eq!(names(suite), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_discovery_error_is_isolated() {
        let root = run(
            env(false),
            discovery_fn(|s: Discovery| async move {
                s.add_node(
                    "describe",
                    "broken",
                    NodeOptions::new(),
                    NodeBody::Block(discovery_fn(|s: Discovery| async move {
                        s.add_node("test", "before", NodeOptions::new(), leaf());
                        Err::<(), _>(TestError::error("exploded"))
                    })),
                );
                s.add_node(
                    "describe",
                    "fine",
                    NodeOptions::new(),
                    NodeBody::Block(discovery_fn(|s: Discovery| async move {
                        s.add_node("test", "t", NodeOptions::new(), leaf());
                    })),
                );
            }),
        )
        .await;

        let broken = root.find(&["suite", "broken"]).unwrap();
        assert_eq!(broken.discovery_stage().unwrap().status(), TestStatus::Error);
        assert_eq!(names(broken), vec!["before"]);
        let fine = root.find(&["suite", "fine"]).unwrap();
        assert_eq!(fine.discovery_stage().unwrap().status(), TestStatus::Pass);
        assert_eq!(names(fine), vec!["t"]);
    }

    #[tokio::test]
    async fn test_misuse_is_reported() {
        let root = run(
            env(false),
            discovery_fn(|s: Discovery| async move {
                s.add_node("nope", "x", NodeOptions::new(), leaf());
                s.add_node(
                    "test",
                    "y",
                    NodeOptions::new(),
                    NodeBody::Block(discovery_fn(|_| async {})),
                );
                s.preset("missing");
            }),
        )
        .await;

        let suite = root.find(&["suite"]).unwrap();
        let messages: Vec<_> = suite
            .discovery_errors()
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(
            messages,
            vec![
                "unknown node type 'nope'",
                "node type 'test' does not accept this kind of content",
                "unknown node option preset 'missing'",
            ]
        );
    }

    #[tokio::test]
    async fn test_preset_and_scope() {
        let root = run(
            env(false),
            discovery_fn(|s: Discovery| async move {
                s.preset("parallel").add_node(
                    "describe",
                    "p",
                    NodeOptions::new(),
                    NodeBody::Block(discovery_fn(|_| async {})),
                );
                s.update_scope(&SEEN, |seen| seen.push("x".into())).unwrap();
            }),
        )
        .await;

        let suite = root.find(&["suite"]).unwrap();
        assert!(suite.find(&["p"]).unwrap().is_parallel());
        assert_eq!(suite.scope(&SEEN).unwrap(), &vec!["x".to_string()]);
        assert!(root.find(&["suite", "p"]).unwrap().scope(&SEEN).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sealed_node_rejects_children() {
        let escaped: Arc<Mutex<Option<Discovery>>> = Arc::new(Mutex::new(None));
        let slot = escaped.clone();
        run(
            env(false),
            discovery_fn(move |s: Discovery| {
                let slot = slot.clone();
                async move {
                    *slot.lock() = Some(s);
                }
            }),
        )
        .await;

        let handle = escaped.lock().take().unwrap();
        let err = handle
            .try_add_node("test", "late", NodeOptions::new(), leaf())
            .unwrap_err();
        assert!(matches!(err, EngineError::DiscoveryClosed(name) if name == "late"));
    }
}
