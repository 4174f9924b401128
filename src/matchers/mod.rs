//! Matchers and assertions
//!
//! A matcher checks a value and explains the outcome. `expect` turns a
//! failed match into an assertion failure, `assume` into a skip.

mod basic;

use futures::future::BoxFuture;
use std::fmt::Debug;
use std::future::Future;

use crate::error::{ErrorKind, SourceLocation, TestError};

pub use basic::{
    contains, equals, has_length, has_substring, is_close_to, is_empty, is_err, is_false,
    is_greater_than, is_less_than, is_none, is_ok, is_some, is_true, satisfies, Length,
};

/// Explanation of a match, possibly built on demand
pub enum Message {
    Static(String),
    Lazy(Box<dyn FnOnce() -> String + Send>),
}

impl Message {
    pub fn lazy<F>(f: F) -> Self
    where
        F: FnOnce() -> String + Send + 'static,
    {
        Message::Lazy(Box::new(f))
    }

    pub fn resolve(self) -> String {
        match self {
            Message::Static(message) => message,
            Message::Lazy(f) => f(),
        }
    }
}

impl From<String> for Message {
    fn from(message: String) -> Self {
        Message::Static(message)
    }
}

impl From<&str> for Message {
    fn from(message: &str) -> Self {
        Message::Static(message.to_string())
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Static(message) => write!(f, "{message:?}"),
            Message::Lazy(_) => write!(f, "<lazy>"),
        }
    }
}

/// Outcome of a matcher.
///
/// The message describes what was observed, so it reads correctly whether
/// or not the match was expected to pass.
#[derive(Debug)]
pub struct MatchResult {
    pub pass: bool,
    pub message: Message,
}

impl MatchResult {
    pub fn new(pass: bool, message: impl Into<Message>) -> Self {
        Self {
            pass,
            message: message.into(),
        }
    }

    pub fn lazy<F>(pass: bool, message: F) -> Self
    where
        F: FnOnce() -> String + Send + 'static,
    {
        Self {
            pass,
            message: Message::lazy(message),
        }
    }
}

pub trait Matcher<T: ?Sized> {
    fn check(&self, actual: &T) -> MatchResult;
}

impl<T: ?Sized, F> Matcher<T> for F
where
    F: Fn(&T) -> MatchResult,
{
    fn check(&self, actual: &T) -> MatchResult {
        self(actual)
    }
}

/// Invert a matcher
pub fn not<T: ?Sized>(matcher: impl Matcher<T>) -> impl Matcher<T> {
    move |actual: &T| {
        let result = matcher.check(actual);
        MatchResult {
            pass: !result.pass,
            message: result.message,
        }
    }
}

/// Replace a matcher's message
pub fn with_message<T: ?Sized>(matcher: impl Matcher<T>, message: impl Into<String>) -> impl Matcher<T> {
    let message = message.into();
    move |actual: &T| MatchResult::new(matcher.check(actual).pass, message.clone())
}

fn verify<T: ?Sized>(
    kind: ErrorKind,
    actual: &T,
    matcher: impl Matcher<T>,
    location: SourceLocation,
) -> Result<(), TestError> {
    let result = matcher.check(actual);
    if result.pass {
        Ok(())
    } else {
        Err(TestError::new(kind, result.message.resolve()).at(location))
    }
}

/// Assert that `actual` matches, failing the running test otherwise
#[track_caller]
pub fn expect<T: ?Sized>(actual: &T, matcher: impl Matcher<T>) {
    if let Err(err) = verify(ErrorKind::Failure, actual, matcher, SourceLocation::caller()) {
        err.raise();
    }
}

/// Skip the running test unless `actual` matches
#[track_caller]
pub fn assume<T: ?Sized>(actual: &T, matcher: impl Matcher<T>) {
    if let Err(err) = verify(ErrorKind::Skip, actual, matcher, SourceLocation::caller()) {
        err.raise();
    }
}

/// Fail the running test
#[track_caller]
pub fn fail(message: impl Into<String>) -> ! {
    TestError::failure(message).raise()
}

/// Skip the running test
#[track_caller]
pub fn skip(message: impl Into<String>) -> ! {
    TestError::skip(message).raise()
}

/// Fluent assertion on a value
pub struct Expectation<'a, T: ?Sized> {
    actual: &'a T,
    kind: ErrorKind,
}

/// Start a fluent assertion: `expect_that(&x).to(equals(3))`
pub fn expect_that<T: ?Sized>(actual: &T) -> Expectation<'_, T> {
    Expectation {
        actual,
        kind: ErrorKind::Failure,
    }
}

/// Start a fluent assumption
pub fn assume_that<T: ?Sized>(actual: &T) -> Expectation<'_, T> {
    Expectation {
        actual,
        kind: ErrorKind::Skip,
    }
}

impl<'a, T: ?Sized> Expectation<'a, T> {
    #[track_caller]
    pub fn to(&self, matcher: impl Matcher<T>) -> &Self {
        if let Err(err) = verify(self.kind, self.actual, matcher, SourceLocation::caller()) {
            err.raise();
        }
        self
    }

    #[track_caller]
    pub fn not_to(&self, matcher: impl Matcher<T>) -> &Self {
        if let Err(err) = verify(self.kind, self.actual, not(matcher), SourceLocation::caller()) {
            err.raise();
        }
        self
    }

    /// Non-panicking form of `to`
    #[track_caller]
    pub fn check(&self, matcher: impl Matcher<T>) -> Result<(), TestError> {
        verify(self.kind, self.actual, matcher, SourceLocation::caller())
    }
}

impl<'a, T: PartialEq + Debug> Expectation<'a, T> {
    #[track_caller]
    pub fn to_equal(&self, expected: T) -> &Self {
        if let Err(err) = verify(self.kind, self.actual, equals(expected), SourceLocation::caller()) {
            err.raise();
        }
        self
    }
}

/// Await `actual`, then assert on its output
#[track_caller]
pub fn expect_async<'a, Fut, M>(actual: Fut, matcher: M) -> BoxFuture<'a, Result<(), TestError>>
where
    Fut: Future + Send + 'a,
    Fut::Output: Send,
    M: Matcher<Fut::Output> + Send + 'a,
{
    let location = SourceLocation::caller();
    Box::pin(async move {
        let value = actual.await;
        verify(ErrorKind::Failure, &value, matcher, location)
    })
}
