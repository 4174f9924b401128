//! test-loom - Pluggable Test Execution Engine
//!
//! Discovers suites into a tree of nodes, then runs every node through one
//! ordered chain of interceptors. Plugins add node types, options and
//! interceptors; the built-in ones cover lifecycle hooks, retry, repeat,
//! timeouts, focus, ignore, stop-at-first-failure, parameterised tests,
//! output capture and mock scoping.
//!
//! ## Features
//!
//! - Async discovery, sequential or concurrent
//! - Interceptor chain with explicit ordering
//! - Result tree with per-stage errors classified as failure, skip or error
//! - Begin/complete event stream with subtree compression
//! - Seeded, reproducible random ordering
//! - Matchers, assumptions and mock functions
//!
//! ## Usage
//!
//! ```no_run
//! use test_loom::prelude::*;
//!
//! # async fn demo() {
//! let config = RunnerConfig::default();
//! let mut builder = Builder::new(config.clone());
//! builder.add_plugin(standard(&config));
//! builder.add_suite("math", |s: Discovery| async move {
//!     s.describe("addition", |s| async move {
//!         s.test("adds", |_| async { expect(&(1 + 1), equals(2)) });
//!         s.test_with("flaky", NodeOptions::new().retry(3), |_| async {});
//!     });
//! });
//!
//! let result = builder.build().await.run(None).await;
//! println!("{}", result.get_descendant_summary());
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod matchers;
pub mod mock;
pub mod models;
pub mod plugins;
pub mod utils;

#[cfg(test)]
mod testing;

pub use crate::config::RunnerConfig;
pub use crate::core::{Builder, Context, Discovery, Node, NodeOptions, Plugin, Runner, TestArgs};
pub use crate::error::{EngineError, ErrorKind, TestError};
pub use crate::events::{Event, EventLog, Listener};
pub use crate::models::{Summary, TestResult, TestStatus};
pub use crate::plugins::standard;

/// Everything a test file usually needs
pub mod prelude {
    pub use crate::config::RunnerConfig;
    pub use crate::core::{
        Builder, Discovery, Entries, Key, NodeOptions, ParamKey, Plugin, Runner, TestArgs,
    };
    pub use crate::error::TestError;
    pub use crate::matchers::{
        assume, assume_that, contains, equals, expect, expect_async, expect_that, fail,
        has_length, has_substring, is_close_to, is_empty, is_err, is_false, is_greater_than,
        is_less_than, is_none, is_ok, is_some, is_true, not, satisfies, skip, with_message,
        MatchResult, Matcher,
    };
    pub use crate::mock::{mock, MockFn, Mockable};
    pub use crate::models::{Summary, TestResult, TestStatus};
    pub use crate::plugins::{
        get_output, get_stderr, get_stdout, standard, HookContext, Parameters, RepeatOptions,
        Teardown,
    };
    pub use crate::{test_eprintln, test_println};
}
