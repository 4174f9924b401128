//! Error types
//!
//! Classified test errors (failure, skip, error) and engine misuse errors.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::Location;
use thiserror::Error;

/// Classification of a raised test error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Assertion did not hold
    Failure,
    /// Assumption not met; the test is skipped
    Skip,
    /// Anything else
    Error,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Failure => write!(f, "failure"),
            ErrorKind::Skip => write!(f, "skip"),
            ErrorKind::Error => write!(f, "error"),
        }
    }
}

/// Source position an error was raised from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    /// Location of the (track_caller) caller
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&Location<'_>> for SourceLocation {
    fn from(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An error raised while running a unit of test work
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TestError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl TestError {
    /// Create an error of the given kind without a location
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    /// Assertion failure raised at the caller
    #[track_caller]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failure, message).at(SourceLocation::caller())
    }

    /// Unmet assumption raised at the caller
    #[track_caller]
    pub fn skip(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Skip, message).at(SourceLocation::caller())
    }

    /// Generic error raised at the caller
    #[track_caller]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message).at(SourceLocation::caller())
    }

    /// Attach a source location
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.kind == ErrorKind::Failure
    }

    pub fn is_skip(&self) -> bool {
        self.kind == ErrorKind::Skip
    }

    pub fn is_error(&self) -> bool {
        self.kind == ErrorKind::Error
    }

    /// Classify a caught panic payload.
    ///
    /// A `TestError` payload keeps its own kind. Messages produced by the
    /// `assert!` family are failures; everything else is an error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<TestError>() {
            Ok(error) => return *error,
            Err(other) => other,
        };
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        let kind = if message.starts_with("assertion") {
            ErrorKind::Failure
        } else {
            ErrorKind::Error
        };
        Self::new(kind, message)
    }

    /// Raise this error as a panic so it unwinds to the nearest stage boundary
    pub fn raise(self) -> ! {
        std::panic::panic_any(self)
    }
}

impl From<anyhow::Error> for TestError {
    #[track_caller]
    fn from(err: anyhow::Error) -> Self {
        Self::error(format!("{err:#}"))
    }
}

impl From<std::io::Error> for TestError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::error(err.to_string())
    }
}

impl From<serde_json::Error> for TestError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::error(err.to_string())
    }
}

impl From<EngineError> for TestError {
    #[track_caller]
    fn from(err: EngineError) -> Self {
        Self::error(err.to_string())
    }
}

/// Strip the directory prefix shared by every error location
pub fn trim_common_prefix(errors: &mut [TestError]) {
    let files: Vec<&str> = errors
        .iter()
        .filter_map(|e| e.location.as_ref().map(|l| l.file.as_str()))
        .collect();
    if files.len() < 2 {
        return;
    }

    let mut prefix = files[0];
    for file in &files[1..] {
        let shared = prefix
            .char_indices()
            .zip(file.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map(|((i, c), _)| i + c.len_utf8())
            .unwrap_or(0);
        prefix = &prefix[..shared];
    }
    // Only cut at a directory boundary
    let cut = match prefix.rfind('/') {
        Some(i) => i + 1,
        None => return,
    };

    for error in errors.iter_mut() {
        if let Some(location) = error.location.as_mut() {
            location.file = location.file[cut..].to_string();
        }
    }
}

/// Engine misuse detected while building or running a suite
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("unknown node option preset '{0}'")]
    UnknownPreset(String),

    #[error("node type '{0}' does not accept this kind of content")]
    BodyMismatch(String),

    #[error("cannot add '{0}': discovery of the parent node has completed")]
    DiscoveryClosed(String),

    #[error("invalid test '{0}'")]
    InvalidTest(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("missing scope '{0}' (is the plugin that declares it registered?)")]
    MissingScope(&'static str),

    #[error("unknown result reference {0}")]
    UnknownResultReference(u64),
}
