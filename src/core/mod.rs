//! Engine core
//!
//! Extension registry, context, node tree, discovery, interceptor chain and
//! the builder/runner pair.

pub mod context;
pub mod discovery;
pub mod extension_store;
pub mod interceptor;
pub mod node;
pub mod runner;

pub use context::{Context, TestArgs, RANDOM_SEED, TEST_ARGS};
pub use discovery::{
    discovery_fn, test_fn, Discovered, Discovery, Entries, Entry, IntoDiscovered, OptionPreset,
    ScopeInit,
};
pub use extension_store::{
    ExtensionKey, ExtensionStore, FrozenExtensions, GlobalKey, Key, KeyId, OptionKey, ParamKey,
    ScopeKey, TypedMap,
};
pub use interceptor::{
    interceptor_fn, order, Chain, InterceptorOptions, Next, RunCondition, RunInterceptor, RunState,
};
pub use node::{DiscoveryFn, Node, NodeBody, NodeId, NodeOptions, NodeShape, NodeType, TestFn, ROOT_TYPE, SUITE_TYPE};
pub use runner::{Builder, Plugin, Runner};
