//! Event compression
//!
//! A complete event carries the full snapshot of its subtree, most of which
//! was already sent with the children's own complete events. The compressor
//! swaps those children for references; the decompressor restores them.
//! A result is referenced at most once, by the first transmitted ancestor,
//! so both sides forget an id as soon as that reference has been made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, TestError};
use crate::events::{Event, ResultSnapshot};
use crate::models::{Summary, TestStatus};

/// Child entry in a compressed snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChildRef {
    /// Already transmitted
    Ref { id: u64 },
    Inline { snapshot: CompressedSnapshot },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompressedSnapshot {
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
    pub children: Vec<ChildRef>,
}

/// Event with compressed subtree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CompressedEvent {
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
        result: CompressedSnapshot,
    },
}

/// Sender side
#[derive(Debug, Default)]
pub struct EventCompressor {
    transmitted: HashSet<u64>,
    omit_boring: bool,
}

impl EventCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop boring results that did not fail
    pub fn omit_boring(mut self, omit: bool) -> Self {
        self.omit_boring = omit;
        self
    }

    /// Compress an event; `None` means it need not be sent at all
    pub fn compress(&mut self, event: &Event) -> Option<CompressedEvent> {
        match event {
            Event::Begin {
                id,
                parent,
                label,
                is_block,
                time,
            } => Some(CompressedEvent::Begin {
                id: *id,
                parent: *parent,
                label: label.clone(),
                is_block: *is_block,
                time: *time,
            }),
            Event::Complete {
                id,
                parent,
                time,
                result,
            } => {
                if self.omit_boring && result.is_omittable() {
                    return None;
                }
                let mut referenced = Vec::new();
                let result = self.compress_snapshot(result, &mut referenced);
                for child in referenced {
                    self.transmitted.remove(&child);
                }
                self.transmitted.insert(*id);
                Some(CompressedEvent::Complete {
                    id: *id,
                    parent: *parent,
                    time: *time,
                    result,
                })
            }
        }
    }

    /// Number of transmitted results that may still be referenced
    pub fn tracked(&self) -> usize {
        self.transmitted.len()
    }

    fn compress_snapshot(
        &self,
        snapshot: &ResultSnapshot,
        referenced: &mut Vec<u64>,
    ) -> CompressedSnapshot {
        let mut children = Vec::new();
        for child in &snapshot.children {
            if self.omit_boring && child.is_omittable() {
                continue;
            }
            if self.transmitted.contains(&child.id) {
                referenced.push(child.id);
                children.push(ChildRef::Ref { id: child.id });
            } else {
                children.push(ChildRef::Inline {
                    snapshot: self.compress_snapshot(child, referenced),
                });
            }
        }

        CompressedSnapshot {
            id: snapshot.id,
            label: snapshot.label.clone(),
            is_test: snapshot.is_test,
            boring: snapshot.boring,
            status: snapshot.status,
            summary: snapshot.summary,
            errors: snapshot.errors.clone(),
            output: snapshot.output.clone(),
            duration_ms: snapshot.duration_ms,
            children,
        }
    }
}

/// Receiver side
#[derive(Debug, Default)]
pub struct EventDecompressor {
    known: HashMap<u64, ResultSnapshot>,
}

impl EventDecompressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decompress(&mut self, event: CompressedEvent) -> Result<Event, EngineError> {
        match event {
            CompressedEvent::Begin {
                id,
                parent,
                label,
                is_block,
                time,
            } => Ok(Event::Begin {
                id,
                parent,
                label,
                is_block,
                time,
            }),
            CompressedEvent::Complete {
                id,
                parent,
                time,
                result,
            } => {
                let result = self.expand(result)?;
                self.known.insert(id, result.clone());
                Ok(Event::Complete {
                    id,
                    parent,
                    time,
                    result,
                })
            }
        }
    }

    /// Number of received results that may still be referenced
    pub fn tracked(&self) -> usize {
        self.known.len()
    }

    fn expand(&mut self, snapshot: CompressedSnapshot) -> Result<ResultSnapshot, EngineError> {
        let mut children = Vec::with_capacity(snapshot.children.len());
        for child in snapshot.children {
            let child = match child {
                ChildRef::Ref { id } => self
                    .known
                    .remove(&id)
                    .ok_or(EngineError::UnknownResultReference(id))?,
                ChildRef::Inline { snapshot } => self.expand(snapshot)?,
            };
            children.push(child);
        }

        Ok(ResultSnapshot {
            id: snapshot.id,
            label: snapshot.label,
            is_test: snapshot.is_test,
            boring: snapshot.boring,
            status: snapshot.status,
            summary: snapshot.summary,
            errors: snapshot.errors,
            output: snapshot.output,
            duration_ms: snapshot.duration_ms,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::models::{ChildOptions, StageOptions, TestResult};
    use std::sync::Arc;

    async fn sample_events() -> Vec<Event> {
        let log = Arc::new(EventLog::default());
        let root = TestResult::root(Some(log.clone()));
        root.start();
        let block = root.add_child(Some("block".into()), ChildOptions::default());
        block.start();
        for (label, boring, fail) in [("a", false, false), ("b", true, false), ("c", true, true)] {
            let leaf = block.add_child(
                Some(label.into()),
                ChildOptions {
                    is_test: true,
                    boring,
                },
            );
            leaf.start();
            leaf.create_stage(StageOptions::tangible(), "test", || async move {
                if fail {
                    Err(TestError::failure("nope"))
                } else {
                    Ok(())
                }
            })
            .await;
            leaf.finish();
        }
        block.finish();
        root.finish();
        log.events()
    }

    fn final_snapshot(events: &[Event]) -> ResultSnapshot {
        match events.last() {
            Some(Event::Complete { result, .. }) => result.clone(),
            other => panic!("unexpected final event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_json() {
        let events = sample_events().await;
        let mut compressor = EventCompressor::new();
        let mut decompressor = EventDecompressor::new();

        let mut restored = Vec::new();
        for event in &events {
            let compressed = compressor.compress(event).unwrap();
            let wire = serde_json::to_string(&compressed).unwrap();
            let received: CompressedEvent = serde_json::from_str(&wire).unwrap();
            restored.push(decompressor.decompress(received).unwrap());
        }

        assert_eq!(restored, events);
        // Only the root, which nothing references, is still remembered
        assert_eq!(compressor.tracked(), 1);
        assert_eq!(decompressor.tracked(), 1);
    }

    #[tokio::test]
    async fn test_referenced_ids_are_forgotten() {
        let events = sample_events().await;
        let mut compressor = EventCompressor::new();
        let mut decompressor = EventDecompressor::new();

        // Leaves a, b and c complete before the block references them
        let mut completes = 0;
        for event in &events {
            let compressed = compressor.compress(event).unwrap();
            decompressor.decompress(compressed).unwrap();
            if matches!(event, Event::Complete { .. }) {
                completes += 1;
                if completes == 3 {
                    assert_eq!(compressor.tracked(), 3);
                    assert_eq!(decompressor.tracked(), 3);
                }
                if completes == 4 {
                    assert_eq!(compressor.tracked(), 1);
                    assert_eq!(decompressor.tracked(), 1);
                }
            }
        }

        // A second reference to an evicted id is unknown
        let stale = CompressedEvent::Complete {
            id: 99,
            parent: None,
            time: Utc::now(),
            result: CompressedSnapshot {
                id: 99,
                label: None,
                is_test: false,
                boring: false,
                status: TestStatus::Pass,
                summary: Summary::default(),
                errors: vec![],
                output: None,
                duration_ms: 0,
                children: vec![ChildRef::Ref {
                    id: final_snapshot(&events).children[0].id,
                }],
            },
        };
        assert!(decompressor.decompress(stale).is_err());
    }

    #[tokio::test]
    async fn test_children_sent_as_references() {
        let events = sample_events().await;
        let mut compressor = EventCompressor::new();
        let compressed: Vec<_> = events.iter().filter_map(|e| compressor.compress(e)).collect();

        match compressed.last() {
            Some(CompressedEvent::Complete { result, .. }) => {
                assert!(matches!(result.children[0], ChildRef::Ref { .. }));
            }
            other => panic!("unexpected final event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_omit_boring_passes() {
        let events = sample_events().await;
        let mut compressor = EventCompressor::new().omit_boring(true);
        let mut decompressor = EventDecompressor::new();

        let mut last = None;
        for event in &events {
            if let Some(compressed) = compressor.compress(event) {
                last = Some(decompressor.decompress(compressed).unwrap());
            }
        }

        let restored = final_snapshot(&[last.unwrap()]);
        let block = restored.find(&["block"]).unwrap();
        let labels: Vec<_> = block.children.iter().filter_map(|c| c.label.clone()).collect();
        assert_eq!(labels, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(block.summary, final_snapshot(&events).children[0].summary);
    }

    #[test]
    fn test_unknown_reference_is_an_error() {
        let mut decompressor = EventDecompressor::new();
        let event = CompressedEvent::Complete {
            id: 2,
            parent: None,
            time: Utc::now(),
            result: CompressedSnapshot {
                id: 2,
                label: None,
                is_test: false,
                boring: false,
                status: TestStatus::Pass,
                summary: Summary::default(),
                errors: vec![],
                output: None,
                duration_ms: 0,
                children: vec![ChildRef::Ref { id: 99 }],
            },
        };
        assert!(matches!(
            decompressor.decompress(event),
            Err(EngineError::UnknownResultReference(99))
        ));
    }
}
