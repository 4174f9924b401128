//! Stop at first failure
//!
//! Once a child of a block with this option has failed, its remaining
//! children are skipped. Only the immediate parent is consulted.

use crate::core::{Builder, Context, Key, Node, NodeOptions, OptionKey, Plugin};
use crate::models::TestResult;

pub const STOP_AT_FIRST_FAILURE: OptionKey<bool> = Key::new("stop at first failure");

impl NodeOptions {
    pub fn stop_at_first_failure(self) -> Self {
        self.with(&STOP_AT_FIRST_FAILURE, true)
    }
}

fn should_run(_: &Context, result: &TestResult, node: &Node) -> bool {
    let stops = node
        .parent()
        .map(|parent| parent.options().flag(&STOP_AT_FIRST_FAILURE))
        .unwrap_or(false);
    if !stops {
        return true;
    }
    !result
        .parent()
        .map(|parent| parent.has_failed())
        .unwrap_or(false)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StopAtFirstFailurePlugin;

impl Plugin for StopAtFirstFailurePlugin {
    fn register(&self, builder: &mut Builder) {
        builder
            .add_node_option("stop at first failure", NodeOptions::stop_at_first_failure)
            .add_run_condition(should_run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestError;
    use crate::models::{Summary, TestStatus};
    use crate::testing::{run_suite, status_at};

    #[tokio::test]
    async fn test_remaining_siblings_skipped() {
        let result = run_suite(|s| async move {
            s.describe_with("stops", NodeOptions::new().stop_at_first_failure(), |s| async move {
                s.test("a", |_| async {});
                s.test("b", |_| async { Err::<(), _>(TestError::failure("no")) });
                s.test("c", |_| async {});
            });
            s.describe("continues", |s| async move {
                s.test("d", |_| async { Err::<(), _>(TestError::failure("no")) });
                s.test("e", |_| async {});
            });
        })
        .await;

        assert_eq!(status_at(&result, &["suite", "stops", "c"]), TestStatus::Skip);
        assert_eq!(status_at(&result, &["suite", "continues", "e"]), TestStatus::Pass);
        assert_eq!(
            result.get_descendant_summary(),
            Summary {
                count: 5,
                pass: 2,
                fail: 2,
                skip: 1,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_skips_do_not_stop() {
        let result = run_suite(|s| async move {
            s.describe_with("stops", NodeOptions::new().stop_at_first_failure(), |s| async move {
                s.ignore().test("a", |_| async {});
                s.test("b", |_| async { Err::<(), _>(TestError::skip("later")) });
                s.test("c", |_| async {});
            });
        })
        .await;

        assert_eq!(status_at(&result, &["suite", "stops", "c"]), TestStatus::Pass);
    }
}
