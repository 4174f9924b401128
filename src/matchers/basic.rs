//! Built-in matchers

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Debug;

use super::{MatchResult, Matcher};

pub fn equals<T: PartialEq + Debug>(expected: T) -> impl Matcher<T> {
    move |actual: &T| {
        if *actual == expected {
            MatchResult::new(true, format!("{actual:?} is equal to {expected:?}"))
        } else {
            MatchResult::new(false, format!("expected {expected:?} but got {actual:?}"))
        }
    }
}

pub fn is_true() -> impl Matcher<bool> {
    |actual: &bool| MatchResult::new(*actual, format!("value is {actual}"))
}

pub fn is_false() -> impl Matcher<bool> {
    |actual: &bool| MatchResult::new(!*actual, format!("value is {actual}"))
}

pub fn is_some<T: Debug>() -> impl Matcher<Option<T>> {
    |actual: &Option<T>| MatchResult::new(actual.is_some(), format!("value is {actual:?}"))
}

pub fn is_none<T: Debug>() -> impl Matcher<Option<T>> {
    |actual: &Option<T>| MatchResult::new(actual.is_none(), format!("value is {actual:?}"))
}

pub fn is_ok<T: Debug, E: Debug>() -> impl Matcher<Result<T, E>> {
    |actual: &Result<T, E>| MatchResult::new(actual.is_ok(), format!("value is {actual:?}"))
}

pub fn is_err<T: Debug, E: Debug>() -> impl Matcher<Result<T, E>> {
    |actual: &Result<T, E>| MatchResult::new(actual.is_err(), format!("value is {actual:?}"))
}

pub fn is_greater_than<T: PartialOrd + Debug>(bound: T) -> impl Matcher<T> {
    move |actual: &T| {
        let pass = *actual > bound;
        let relation = if pass { "greater than" } else { "not greater than" };
        MatchResult::new(pass, format!("{actual:?} is {relation} {bound:?}"))
    }
}

pub fn is_less_than<T: PartialOrd + Debug>(bound: T) -> impl Matcher<T> {
    move |actual: &T| {
        let pass = *actual < bound;
        let relation = if pass { "less than" } else { "not less than" };
        MatchResult::new(pass, format!("{actual:?} is {relation} {bound:?}"))
    }
}

/// Within `tolerance` of `expected`
pub fn is_close_to(expected: f64, tolerance: f64) -> impl Matcher<f64> {
    move |actual: &f64| {
        let delta = (actual - expected).abs();
        MatchResult::new(
            delta <= tolerance,
            format!("{actual} differs from {expected} by {delta} (tolerance {tolerance})"),
        )
    }
}

pub fn has_substring<T: AsRef<str> + ?Sized>(needle: impl Into<String>) -> impl Matcher<T> {
    let needle = needle.into();
    move |actual: &T| {
        let actual = actual.as_ref();
        let pass = actual.contains(needle.as_str());
        let relation = if pass { "contains" } else { "does not contain" };
        MatchResult::new(pass, format!("{actual:?} {relation} {needle:?}"))
    }
}

pub fn contains<C, T>(item: T) -> impl Matcher<C>
where
    C: AsRef<[T]> + ?Sized,
    T: PartialEq + Debug,
{
    move |actual: &C| {
        let items = actual.as_ref();
        let pass = items.contains(&item);
        let relation = if pass { "contains" } else { "does not contain" };
        MatchResult::new(pass, format!("{items:?} {relation} {item:?}"))
    }
}

/// Anything with a length
pub trait Length {
    fn length(&self) -> usize;
}

impl Length for str {
    fn length(&self) -> usize {
        self.len()
    }
}

impl Length for String {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T> Length for [T] {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T> Length for Vec<T> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T> Length for VecDeque<T> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<K, V, S> Length for HashMap<K, V, S> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<T, S> Length for HashSet<T, S> {
    fn length(&self) -> usize {
        self.len()
    }
}

impl<K, V> Length for BTreeMap<K, V> {
    fn length(&self) -> usize {
        self.len()
    }
}

pub fn has_length<T: Length + ?Sized>(expected: usize) -> impl Matcher<T> {
    move |actual: &T| {
        let length = actual.length();
        MatchResult::new(
            length == expected,
            format!("length is {length}, expected {expected}"),
        )
    }
}

pub fn is_empty<T: Length + ?Sized>() -> impl Matcher<T> {
    |actual: &T| {
        let length = actual.length();
        MatchResult::new(length == 0, format!("length is {length}"))
    }
}

/// Custom predicate with a description of what it checks
pub fn satisfies<T, F>(description: impl Into<String>, predicate: F) -> impl Matcher<T>
where
    T: Debug + ?Sized,
    F: Fn(&T) -> bool,
{
    let description = description.into();
    move |actual: &T| {
        let pass = predicate(actual);
        let verdict = if pass { "satisfies" } else { "does not satisfy" };
        MatchResult::new(pass, format!("{actual:?} {verdict} {description}"))
    }
}
