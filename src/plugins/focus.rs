//! Focus
//!
//! When any node in the tree is focused, only focused nodes, their
//! descendants and the containers leading to them run; everything else is
//! skipped.

use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::core::{
    order, Builder, Context, Discovery, InterceptorOptions, Key, Next, Node, NodeId,
    NodeOptions, OptionKey, Plugin, RunInterceptor, ScopeKey,
};
use crate::models::TestResult;

pub const FOCUS: OptionKey<bool> = Key::new("focus");

/// Focus state carried in the context
pub const FOCUS_STATE: ScopeKey<FocusState> = Key::new("focus state");

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FocusState {
    /// Not yet decided; only seen by the root
    #[default]
    Pending,
    /// Nothing in the tree is focused
    NoFocus,
    /// Something below is focused, but not this path yet. Holds every node
    /// that is focused or leads to a focused node, computed once at the root.
    Searching(Arc<HashSet<NodeId>>),
    /// Inside a focused node
    Within,
}

fn is_focused(node: &Node) -> bool {
    node.options().flag(&FOCUS)
}

impl NodeOptions {
    pub fn focus(self) -> Self {
        self.with(&FOCUS, true)
    }
}

impl Discovery {
    /// Handle whose registrations are focused
    pub fn focus(&self) -> Discovery {
        self.preset("focus")
    }
}

struct Focus;

impl RunInterceptor for Focus {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        _result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        let state = context.get(&FOCUS_STATE).cloned().unwrap_or_default();
        let state = match state {
            FocusState::Pending => {
                let paths = node.paths_matching(&is_focused);
                if paths.is_empty() {
                    FocusState::NoFocus
                } else {
                    debug!("{} nodes on focused paths, running only those", paths.len());
                    FocusState::Searching(Arc::new(paths))
                }
            }
            other => other,
        };

        match state {
            FocusState::Searching(_) if is_focused(&node) => {
                next.proceed_with(context.with(&FOCUS_STATE, FocusState::Within))
            }
            FocusState::Searching(paths) if paths.contains(&node.id()) => {
                next.proceed_with(context.with(&FOCUS_STATE, FocusState::Searching(paths)))
            }
            FocusState::Searching(_) => next.proceed_with(context.deactivated()),
            other => next.proceed_with(context.with(&FOCUS_STATE, other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FocusPlugin;

impl Plugin for FocusPlugin {
    fn register(&self, builder: &mut Builder) {
        builder
            .add_context_scope(&FOCUS_STATE, FocusState::default)
            .add_node_option("focus", NodeOptions::focus)
            .add_run_interceptor(
                Arc::new(Focus),
                InterceptorOptions::order(order::FOCUS).with_id("focus"),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Summary, TestStatus};
    use crate::testing::{run_suite, status_at};

    #[tokio::test]
    async fn test_single_focused_test() {
        let result = run_suite(|s| async move {
            s.test("a", |_| async {});
            s.focus().test("b", |_| async {});
            s.describe("group", |s| async move {
                s.test("c", |_| async {});
                s.test("d", |_| async {});
            });
        })
        .await;

        assert_eq!(
            result.get_descendant_summary(),
            Summary {
                count: 4,
                pass: 1,
                skip: 3,
                ..Default::default()
            }
        );
        assert_eq!(status_at(&result, &["suite", "b"]), TestStatus::Pass);
    }

    #[tokio::test]
    async fn test_focused_container_runs_descendants() {
        let result = run_suite(|s| async move {
            s.test("a", |_| async {});
            s.describe_with("group", NodeOptions::new().focus(), |s| async move {
                s.test("c", |_| async {});
                s.describe("nested", |s| async move {
                    s.test("d", |_| async {});
                });
            });
        })
        .await;

        assert_eq!(
            result.get_descendant_summary(),
            Summary {
                count: 3,
                pass: 2,
                skip: 1,
                ..Default::default()
            }
        );
        assert_eq!(status_at(&result, &["suite", "a"]), TestStatus::Skip);
    }

    #[tokio::test]
    async fn test_focus_in_separate_branches() {
        let result = run_suite(|s| async move {
            s.describe("first", |s| async move {
                s.describe("inner", |s| async move {
                    s.focus().test("deep", |_| async {});
                    s.test("sibling", |_| async {});
                });
            });
            s.describe("second", |s| async move {
                s.focus().test("shallow", |_| async {});
            });
            s.describe("third", |s| async move {
                s.test("other", |_| async {});
            });
        })
        .await;

        assert_eq!(status_at(&result, &["suite", "first", "inner", "deep"]), TestStatus::Pass);
        assert_eq!(status_at(&result, &["suite", "second", "shallow"]), TestStatus::Pass);
        assert_eq!(
            status_at(&result, &["suite", "first", "inner", "sibling"]),
            TestStatus::Skip
        );
        assert_eq!(status_at(&result, &["suite", "third"]), TestStatus::Skip);
    }

    #[tokio::test]
    async fn test_no_focus_runs_everything() {
        let result = run_suite(|s| async move {
            s.test("a", |_| async {});
            s.test("b", |_| async {});
        })
        .await;
        assert_eq!(result.get_descendant_summary().pass, 2);
    }
}
