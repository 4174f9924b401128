//! Run context
//!
//! Immutable, structurally shared state threaded through the interceptor
//! chain. Changing it for descendants means deriving a new context.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::core::extension_store::{GlobalKey, Key, ParamKey, ScopeKey, TypedMap};
use crate::error::TestError;

/// Arguments accumulated for the test body
pub const TEST_ARGS: ScopeKey<TestArgs> = Key::new("test arguments");

/// Seed used to shuffle this run
pub const RANDOM_SEED: GlobalKey<String> = Key::new("random seed");

/// Parameters handed to a test body.
///
/// Named parameters are looked up by key; positional ones follow in the
/// order they were added (parameter variants first, then hooks).
#[derive(Clone, Debug, Default)]
pub struct TestArgs {
    named: TypedMap,
    positional: Vec<Value>,
    globals: Arc<TypedMap>,
}

impl TestArgs {
    pub(crate) fn with_globals(mut self, globals: Arc<TypedMap>) -> Self {
        self.globals = globals;
        self
    }

    pub(crate) fn set<T: Send + Sync + 'static>(&mut self, key: &ParamKey<T>, value: T) {
        self.named.insert(key, value);
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.positional.push(value);
    }

    pub(crate) fn extend(&mut self, values: impl IntoIterator<Item = Value>) {
        self.positional.extend(values);
    }

    /// Named parameter set by a hook
    pub fn get<T: 'static>(&self, key: &ParamKey<T>) -> Option<&T> {
        self.named.get(key)
    }

    /// Named parameter, or a skip error when the hook providing it did not run
    pub fn require<T: 'static>(&self, key: &ParamKey<T>) -> Result<&T, TestError> {
        self.get(key)
            .ok_or_else(|| TestError::skip(format!("parameter '{}' not set", key.name())))
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Positional parameter deserialized into `T`
    pub fn param_as<T: DeserializeOwned>(&self, index: usize) -> Result<T, TestError> {
        let value = self
            .param(index)
            .ok_or_else(|| TestError::error(format!("no parameter at position {index}")))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn global<T: 'static>(&self, key: &GlobalKey<T>) -> Option<&T> {
        self.globals.get(key)
    }

    pub fn seed(&self) -> Option<&str> {
        self.global(&RANDOM_SEED).map(String::as_str)
    }
}

/// State propagated down one execution path
#[derive(Clone, Debug)]
pub struct Context {
    active: bool,
    values: Arc<TypedMap>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(TypedMap::new())
    }
}

impl Context {
    pub fn new(values: TypedMap) -> Self {
        Self {
            active: true,
            values: Arc::new(values),
        }
    }

    /// False once something upstream decided this path should not run
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deactivated(&self) -> Self {
        Self {
            active: false,
            values: self.values.clone(),
        }
    }

    /// Derived context with `key` set; `self` is unchanged
    pub fn with<T: Send + Sync + 'static>(&self, key: &ScopeKey<T>, value: T) -> Self {
        let mut values = (*self.values).clone();
        values.insert(key, value);
        Self {
            active: self.active,
            values: Arc::new(values),
        }
    }

    pub fn get<T: 'static>(&self, key: &ScopeKey<T>) -> Option<&T> {
        self.values.get(key)
    }

    pub fn args(&self) -> TestArgs {
        self.get(&TEST_ARGS).cloned().unwrap_or_default()
    }

    pub fn with_args(&self, args: TestArgs) -> Self {
        self.with(&TEST_ARGS, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEPTH: ScopeKey<u32> = Key::new("depth");
    const NAME: ParamKey<String> = Key::new("name");

    #[test]
    fn test_with_is_copy_on_write() {
        let base = Context::default().with(&DEPTH, 1);
        let derived = base.with(&DEPTH, 2);
        assert_eq!(base.get(&DEPTH), Some(&1));
        assert_eq!(derived.get(&DEPTH), Some(&2));
    }

    #[test]
    fn test_deactivated_keeps_values() {
        let base = Context::default().with(&DEPTH, 3);
        let inactive = base.deactivated();
        assert!(base.is_active());
        assert!(!inactive.is_active());
        assert_eq!(inactive.get(&DEPTH), Some(&3));
        assert!(!inactive.with(&DEPTH, 4).is_active());
    }

    #[test]
    fn test_args() {
        let mut args = TestArgs::default();
        args.set(&NAME, "db".to_string());
        args.extend([json!(1), json!("x")]);

        let ctx = Context::default().with_args(args);
        let args = ctx.args();
        assert_eq!(args.get(&NAME).map(String::as_str), Some("db"));
        assert_eq!(args.param_as::<u32>(0).unwrap(), 1);
        assert!(args.param_as::<u32>(1).is_err());
        assert!(args.param_as::<u32>(2).is_err());
        assert!(args.seed().is_none());
    }
}
