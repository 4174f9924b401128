//! Discovery tree nodes
//!
//! Node type descriptors, per-instance options, and the frozen node tree
//! that execution walks.

use futures::future::BoxFuture;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::core::context::TestArgs;
use crate::core::discovery::{Discovered, Discovery};
use crate::core::extension_store::{OptionKey, ScopeKey, TypedMap};
use crate::error::TestError;
use crate::models::ResultStage;

/// Body of a test leaf
pub type TestFn = Arc<dyn Fn(TestArgs) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync>;

/// Content of a block, run once during discovery
pub type DiscoveryFn =
    Arc<dyn Fn(Discovery) -> BoxFuture<'static, Result<Discovered, TestError>> + Send + Sync>;

/// Address-based identity; stable while the tree is alive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

pub const ROOT_TYPE: &str = "root";
pub const SUITE_TYPE: &str = "suite";

/// Whether a node type holds children or runs a body
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeShape {
    /// Declarative entries register functions through `test` and mappings through `sub`
    Block { test: String, sub: String },
    Leaf,
}

/// Immutable descriptor shared by every node of one type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeType {
    key: String,
    display: String,
    shape: NodeShape,
}

impl NodeType {
    pub fn block(key: impl Into<String>, test: impl Into<String>, sub: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            display: key.clone(),
            key,
            shape: NodeShape::Block {
                test: test.into(),
                sub: sub.into(),
            },
        }
    }

    pub fn leaf(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            display: key.clone(),
            key,
            shape: NodeShape::Leaf,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn shape(&self) -> &NodeShape {
        &self.shape
    }

    pub fn is_block(&self) -> bool {
        matches!(self.shape, NodeShape::Block { .. })
    }
}

/// Per-instance options of a node.
///
/// Plugin options live in `extra` under the plugin's own [`OptionKey`].
#[derive(Clone, Debug, Default)]
pub struct NodeOptions {
    name: Option<String>,
    parallel: bool,
    extra: TypedMap,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new().with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Run children concurrently
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with<T: Send + Sync + 'static>(mut self, key: &OptionKey<T>, value: T) -> Self {
        self.set(key, value);
        self
    }

    pub fn set<T: Send + Sync + 'static>(&mut self, key: &OptionKey<T>, value: T) {
        self.extra.insert(key, value);
    }

    pub fn get<T: 'static>(&self, key: &OptionKey<T>) -> Option<&T> {
        self.extra.get(key)
    }

    /// Boolean option, false when unset
    pub fn flag(&self, key: &OptionKey<bool>) -> bool {
        self.get(key).copied().unwrap_or(false)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }
}

/// Content registered for a new node
#[derive(Clone)]
pub enum NodeBody {
    Block(DiscoveryFn),
    Test(TestFn),
}

impl fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeBody::Block(_) => write!(f, "Block(..)"),
            NodeBody::Test(_) => write!(f, "Test(..)"),
        }
    }
}

/// Frozen element of the discovered tree
pub struct Node {
    pub(crate) node_type: Arc<NodeType>,
    pub(crate) options: NodeOptions,
    pub(crate) run: Option<TestFn>,
    pub(crate) scopes: TypedMap,
    pub(crate) children: Vec<Arc<Node>>,
    pub(crate) parent: Weak<Node>,
    pub(crate) discovery: Option<ResultStage>,
    pub(crate) discovery_errors: Vec<TestError>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("type", &self.node_type.key())
            .field("name", &self.options.name())
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn node_type(&self) -> &NodeType {
        &self.node_type
    }

    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    pub fn name(&self) -> Option<&str> {
        self.options.name()
    }

    /// Leaf with a body to run
    pub fn is_test(&self) -> bool {
        self.run.is_some()
    }

    pub fn test_fn(&self) -> Option<&TestFn> {
        self.run.as_ref()
    }

    pub fn is_parallel(&self) -> bool {
        self.options.is_parallel()
    }

    pub fn scope<T: 'static>(&self, key: &ScopeKey<T>) -> Option<&T> {
        self.scopes.get(key)
    }

    pub fn children(&self) -> &[Arc<Node>] {
        &self.children
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.upgrade()
    }

    pub fn is_root(&self) -> bool {
        self.parent.upgrade().is_none()
    }

    pub fn discovery_stage(&self) -> Option<&ResultStage> {
        self.discovery.as_ref()
    }

    pub fn discovery_errors(&self) -> &[TestError] {
        &self.discovery_errors
    }

    /// This node and its ancestors, root first
    pub fn lineage(self: &Arc<Self>) -> Vec<Arc<Node>> {
        let mut lineage = vec![self.clone()];
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            lineage.push(node);
        }
        lineage.reverse();
        lineage
    }

    /// Names from the root down to this node
    pub fn path(self: &Arc<Self>) -> Vec<String> {
        self.lineage()
            .iter()
            .filter_map(|n| n.name().map(str::to_string))
            .collect()
    }

    /// Identity of this node within its frozen tree
    pub fn id(&self) -> NodeId {
        NodeId(self as *const Node as usize)
    }

    /// Ids of every node that matches or has a matching descendant, in one walk
    pub fn paths_matching(&self, predicate: &dyn Fn(&Node) -> bool) -> HashSet<NodeId> {
        let mut found = HashSet::new();
        self.collect_matching(predicate, &mut found);
        found
    }

    fn collect_matching(&self, predicate: &dyn Fn(&Node) -> bool, found: &mut HashSet<NodeId>) -> bool {
        let mut matched = predicate(self);
        for child in &self.children {
            matched |= child.collect_matching(predicate, found);
        }
        if matched {
            found.insert(self.id());
        }
        matched
    }

    /// Depth-first search by name path below this node
    pub fn find(&self, path: &[&str]) -> Option<&Arc<Node>> {
        let (head, rest) = path.split_first()?;
        let child = self.children.iter().find(|c| c.name() == Some(*head))?;
        if rest.is_empty() {
            Some(child)
        } else {
            child.find(rest)
        }
    }

    /// Number of test leaves below and including this node
    pub fn test_count(&self) -> usize {
        usize::from(self.is_test()) + self.children.iter().map(|c| c.test_count()).sum::<usize>()
    }
}
