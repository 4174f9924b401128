//! Event stream
//!
//! Begin/complete records emitted as results start and finish, in a shape
//! that can cross a process or network boundary.

mod compress;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{trim_common_prefix, TestError};
use crate::models::{Summary, TestResult, TestStatus};

pub use compress::{ChildRef, CompressedEvent, CompressedSnapshot, EventCompressor, EventDecompressor};

/// A progress record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Begin {
        id: u64,
        parent: Option<u64>,
        label: Option<String>,
        is_block: bool,
        time: DateTime<Utc>,
    },
    Complete {
        id: u64,
        parent: Option<u64>,
        time: DateTime<Utc>,
        result: ResultSnapshot,
    },
}

impl Event {
    pub fn id(&self) -> u64 {
        match self {
            Event::Begin { id, .. } | Event::Complete { id, .. } => *id,
        }
    }
}

/// Receiver of progress events
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> Listener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Listener that keeps every event in memory
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Listener for EventLog {
    fn on_event(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Serializable copy of a result subtree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub id: u64,
    pub label: Option<String>,
    pub is_test: bool,
    pub boring: bool,
    pub status: TestStatus,
    pub summary: Summary,
    pub errors: Vec<TestError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub duration_ms: u64,
    pub children: Vec<ResultSnapshot>,
}

impl ResultSnapshot {
    pub fn capture(result: &TestResult) -> Self {
        let mut errors = result.all_errors();
        trim_common_prefix(&mut errors);
        Self {
            id: result.id(),
            label: result.label().map(str::to_string),
            is_test: result.is_test(),
            boring: result.is_boring(),
            status: result.status(),
            summary: result.get_descendant_summary(),
            errors,
            output: result.output(),
            duration_ms: result.duration().unwrap_or_default().as_millis() as u64,
            children: result
                .children()
                .iter()
                .map(|c| ResultSnapshot::capture(c))
                .collect(),
        }
    }

    /// Boring and nothing below it failed
    pub fn is_omittable(&self) -> bool {
        self.boring && !self.summary.has_failed()
    }

    /// Find a node by its label path below this snapshot
    pub fn find(&self, path: &[&str]) -> Option<&ResultSnapshot> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => self
                .children
                .iter()
                .find(|c| c.label.as_deref() == Some(*head))
                .and_then(|c| c.find(rest)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_event_serde_tag() {
        let event = Event::Begin {
            id: 3,
            parent: Some(1),
            label: Some("t".into()),
            is_block: false,
            time: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "begin");
        assert_eq!(json["parent"], 1);

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_closure_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = {
            let seen = seen.clone();
            move |event: &Event| seen.lock().push(event.id())
        };
        let root = TestResult::root(Some(Arc::new(listener)));
        root.start();
        root.finish();
        assert_eq!(*seen.lock(), vec![root.id(), root.id()]);
    }

    #[test]
    fn test_snapshot_find() {
        let log = Arc::new(EventLog::default());
        let root = TestResult::root(Some(log.clone()));
        root.start();
        let block = root.add_child(Some("a".into()), Default::default());
        block.start();
        let leaf = block.add_child(
            Some("b".into()),
            crate::models::ChildOptions {
                is_test: true,
                boring: false,
            },
        );
        leaf.start();
        leaf.finish();
        block.finish();
        root.finish();

        let snapshot = ResultSnapshot::capture(&root);
        let found = snapshot.find(&["a", "b"]).unwrap();
        assert_eq!(found.summary, Summary::of(TestStatus::Pass));
        assert_eq!(snapshot.summary.count, 1);
        assert_eq!(log.len(), 6);
    }
}
