//! describe / test / it
//!
//! Node types for nested blocks and test leaves, and the discovery methods
//! that register them.

use std::future::Future;

use crate::core::{
    discovery_fn, test_fn, Builder, Discovery, Entries, IntoDiscovered, NodeBody, NodeOptions,
    NodeType, Plugin, TestArgs,
};
use crate::models::IntoOutcome;

pub const DESCRIBE: &str = "describe";
pub const TEST: &str = "test";
pub const IT: &str = "it";

/// Registers `describe`, `test` and its alias `it`
#[derive(Clone, Copy, Debug, Default)]
pub struct Describe;

impl Plugin for Describe {
    fn register(&self, builder: &mut Builder) {
        builder
            .add_node_type(NodeType::block(DESCRIBE, TEST, DESCRIBE))
            .add_node_type(NodeType::leaf(TEST))
            .add_node_type(NodeType::leaf(IT).with_display(TEST));
    }
}

impl Discovery {
    /// Nested block whose content registers its own children
    pub fn describe<F, Fut>(&self, name: impl Into<String>, content: F)
    where
        F: Fn(Discovery) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoDiscovered,
    {
        self.describe_with(name, NodeOptions::new(), content)
    }

    pub fn describe_with<F, Fut>(&self, name: impl Into<String>, options: NodeOptions, content: F)
    where
        F: Fn(Discovery) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoDiscovered,
    {
        self.add_node(DESCRIBE, name, options, NodeBody::Block(discovery_fn(content)));
    }

    /// Nested block from declarative entries
    pub fn describe_entries(&self, name: impl Into<String>, entries: Entries) {
        self.describe(name, move |_| {
            let entries = entries.clone();
            async move { entries }
        });
    }

    pub fn test<F, Fut>(&self, name: impl Into<String>, body: F)
    where
        F: Fn(TestArgs) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
    {
        self.test_with(name, NodeOptions::new(), body)
    }

    pub fn test_with<F, Fut>(&self, name: impl Into<String>, options: NodeOptions, body: F)
    where
        F: Fn(TestArgs) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
    {
        self.add_node(TEST, name, options, NodeBody::Test(test_fn(body)));
    }

    pub fn it<F, Fut>(&self, name: impl Into<String>, body: F)
    where
        F: Fn(TestArgs) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: IntoOutcome,
    {
        self.add_node(IT, name, NodeOptions::new(), NodeBody::Test(test_fn(body)));
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TestError;
    use crate::models::{Summary, TestStatus};
    use crate::testing::{run_suite, status_at};

    #[tokio::test]
    async fn test_describe_with_erroring_test() {
        let result = run_suite(|s| async move {
            s.describe("x", |s| async move {
                s.before_each(|_| async {});
                s.test("test 1", |_| async { Err::<(), _>(TestError::error("boom")) });
                s.test("test 2", |_| async {});
            });
        })
        .await;

        assert_eq!(
            result.get_descendant_summary(),
            Summary {
                count: 2,
                error: 1,
                pass: 1,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_entries_and_it_alias() {
        let result = run_suite(|s| async move {
            s.describe_entries(
                "x",
                crate::core::Entries::new()
                    .test("a", |_| async {})
                    .block("inner", crate::core::Entries::new().test("b", |_| async {})),
            );
            s.it("c", |_| async {});
        })
        .await;

        assert_eq!(
            result.get_descendant_summary(),
            Summary {
                count: 3,
                pass: 3,
                ..Default::default()
            }
        );
        assert_eq!(status_at(&result, &["suite", "x", "inner", "b"]), TestStatus::Pass);
        assert_eq!(status_at(&result, &["suite", "c"]), TestStatus::Pass);
    }
}
