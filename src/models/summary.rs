//! Status and summary types
//!
//! Single-value classification of a unit of work and additive counts over
//! a result tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Classification of a stage or test, ordered by severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Skip,
    Fail,
    Error,
}

impl TestStatus {
    /// Get status symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skip => "○",
            TestStatus::Error => "!",
        }
    }

    /// Check if status is success
    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }

    /// Failed or errored
    pub fn is_failed(&self) -> bool {
        matches!(self, TestStatus::Fail | TestStatus::Error)
    }

    /// The more severe of two statuses
    pub fn worst(self, other: TestStatus) -> TestStatus {
        self.max(other)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skip => write!(f, "SKIP"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Counts of tests by classification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub skip: usize,
}

impl Summary {
    /// Summary of a single completed test
    pub fn of(status: TestStatus) -> Self {
        let mut summary = Self {
            count: 1,
            ..Self::default()
        };
        match status {
            TestStatus::Pass => summary.pass = 1,
            TestStatus::Fail => summary.fail = 1,
            TestStatus::Skip => summary.skip = 1,
            TestStatus::Error => summary.error = 1,
        }
        summary
    }

    /// Partial summary of a structural node: only errors and failures count
    pub fn partial(status: TestStatus) -> Self {
        match status {
            TestStatus::Error => Self {
                error: 1,
                ..Self::default()
            },
            TestStatus::Fail => Self {
                fail: 1,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    /// A test that has not run yet
    pub fn pending() -> Self {
        Self {
            count: 1,
            ..Self::default()
        }
    }

    pub fn has_failed(&self) -> bool {
        self.fail > 0 || self.error > 0
    }

    /// Exit indicator: nothing failed and at least one test passed
    pub fn is_success(&self) -> bool {
        !(self.error > 0 || self.fail > 0 || self.pass == 0)
    }

    /// Overall classification of the counted tests
    pub fn status(&self) -> TestStatus {
        if self.error > 0 {
            TestStatus::Error
        } else if self.fail > 0 {
            TestStatus::Fail
        } else if self.pass == 0 && self.skip > 0 {
            TestStatus::Skip
        } else {
            TestStatus::Pass
        }
    }

    /// Calculate pass rate as percentage
    pub fn pass_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.pass as f64 / self.count as f64) * 100.0
        }
    }
}

impl Add for Summary {
    type Output = Summary;

    fn add(mut self, rhs: Summary) -> Summary {
        self += rhs;
        self
    }
}

impl AddAssign for Summary {
    fn add_assign(&mut self, rhs: Summary) {
        self.count += rhs.count;
        self.pass += rhs.pass;
        self.fail += rhs.fail;
        self.error += rhs.error;
        self.skip += rhs.skip;
    }
}

impl Sum for Summary {
    fn sum<I: Iterator<Item = Summary>>(iter: I) -> Self {
        iter.fold(Summary::default(), Add::add)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}",
            self.count, self.pass, self.fail, self.skip, self.error
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_severity() {
        assert_eq!(TestStatus::Pass.worst(TestStatus::Skip), TestStatus::Skip);
        assert_eq!(TestStatus::Error.worst(TestStatus::Fail), TestStatus::Error);
        assert_eq!(TestStatus::Fail.worst(TestStatus::Skip), TestStatus::Fail);
        assert_eq!(TestStatus::Error.symbol(), "!");
        assert_eq!(TestStatus::Skip.to_string(), "SKIP");
    }

    #[test]
    fn test_summary_sum() {
        let total: Summary = [TestStatus::Pass, TestStatus::Error, TestStatus::Pass]
            .into_iter()
            .map(Summary::of)
            .sum();
        assert_eq!(
            total,
            Summary {
                count: 3,
                pass: 2,
                error: 1,
                ..Default::default()
            }
        );
        assert!(total.has_failed());
        assert!(!total.is_success());
        assert_eq!(total.status(), TestStatus::Error);
    }

    #[test]
    fn test_summary_is_success_needs_a_pass() {
        assert!(!Summary::default().is_success());
        assert!(!Summary::of(TestStatus::Skip).is_success());
        assert!(Summary::of(TestStatus::Pass).is_success());
    }

    #[test]
    fn test_partial_summary() {
        assert_eq!(Summary::partial(TestStatus::Error).error, 1);
        assert_eq!(Summary::partial(TestStatus::Error).count, 0);
        assert_eq!(Summary::partial(TestStatus::Skip), Summary::default());
    }

    #[test]
    fn test_summary_display() {
        let summary = Summary::of(TestStatus::Fail);
        assert_eq!(
            summary.to_string(),
            "Total: 1 | Pass: 0 | Fail: 1 | Skip: 0 | Error: 0"
        );
        assert_eq!(summary.pass_rate(), 0.0);
    }
}
