//! Ignore
//!
//! Ignored nodes never run; their tests are reported as skipped.

use crate::core::{Builder, Context, Discovery, Key, Node, NodeOptions, OptionKey, Plugin};
use crate::models::TestResult;

pub const IGNORE: OptionKey<bool> = Key::new("ignore");

impl NodeOptions {
    pub fn ignore(self) -> Self {
        self.with(&IGNORE, true)
    }
}

impl Discovery {
    /// Handle whose registrations are ignored
    pub fn ignore(&self) -> Discovery {
        self.preset("ignore")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IgnorePlugin;

impl Plugin for IgnorePlugin {
    fn register(&self, builder: &mut Builder) {
        builder
            .add_node_option("ignore", NodeOptions::ignore)
            .add_run_condition(|_: &Context, _: &TestResult, node: &Node| {
                !node.options().flag(&IGNORE)
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Summary, TestStatus};
    use crate::testing::{entries, record, run_suite, status_at, trace};

    #[tokio::test]
    #[allow(dependency_on_unit_never_type_fallback)]
    async fn test_ignored_nodes_are_skipped() {
        let result = run_suite(|s| async move {
            s.test("a", |_| async {});
            s.ignore().test("b", |_| async { panic!("never runs") });
            s.describe_with("group", NodeOptions::new().ignore(), |s| async move {
                s.test("c", |_| async {});
            });
        })
        .await;

        assert_eq!(
            result.get_descendant_summary(),
            Summary {
                count: 3,
                pass: 1,
                skip: 2,
                ..Default::default()
            }
        );
        assert_eq!(status_at(&result, &["suite", "b"]), TestStatus::Skip);
    }

    #[tokio::test]
    async fn test_ignored_block_runs_no_hooks() {
        let trace = trace();
        let t = trace.clone();
        run_suite(move |s| {
            let t = t.clone();
            async move {
                s.describe_with("group", NodeOptions::new().ignore(), move |s| {
                    let t = t.clone();
                    async move {
                        s.before_all(move |_| {
                            let t = t.clone();
                            async move { record(&t, "before all") }
                        });
                        s.test("c", |_| async {});
                    }
                });
            }
        })
        .await;
        assert!(entries(&trace).is_empty());
    }
}
