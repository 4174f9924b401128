//! Mock functions
//!
//! [`MockFn`] records every call and answers from configured rules.
//! [`Mockable`] is a function slot that can be swapped for a mock and
//! restored, automatically when the node that installed it finishes.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::TestError;
use crate::plugins::mock_scope::on_revert;

/// One recorded call
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation<A, R> {
    pub args: A,
    pub returned: Result<R, TestError>,
}

type Respond<A, R> = Arc<dyn Fn(&A) -> Result<R, TestError> + Send + Sync>;

#[derive(Clone)]
enum Behaviour<A, R> {
    Return(R),
    Throw(TestError),
    Call(Respond<A, R>),
}

impl<A, R: Clone> Behaviour<A, R> {
    fn respond(&self, args: &A) -> Result<R, TestError> {
        match self {
            Behaviour::Return(value) => Ok(value.clone()),
            Behaviour::Throw(error) => Err(error.clone()),
            Behaviour::Call(f) => f(args),
        }
    }
}

struct Rule<A, R> {
    args: Option<A>,
    remaining: Option<usize>,
    behaviour: Behaviour<A, R>,
}

struct MockState<A, R> {
    invocations: Vec<Invocation<A, R>>,
    rules: Vec<Rule<A, R>>,
    default: Option<Behaviour<A, R>>,
    fallback: Option<Respond<A, R>>,
    revert: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl<A, R> Default for MockState<A, R> {
    fn default() -> Self {
        Self {
            invocations: Vec::new(),
            rules: Vec::new(),
            default: None,
            fallback: None,
            revert: None,
        }
    }
}

/// A recording, programmable function
pub struct MockFn<A, R> {
    name: Arc<str>,
    state: Arc<Mutex<MockState<A, R>>>,
}

impl<A, R> Clone for MockFn<A, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            state: self.state.clone(),
        }
    }
}

impl<A, R> fmt::Debug for MockFn<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockFn")
            .field("name", &self.name)
            .field("calls", &self.state.lock().invocations.len())
            .finish()
    }
}

impl<A, R> MockFn<A, R>
where
    A: Clone + PartialEq + Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Answer unmatched calls with `f` instead of an error
    pub fn with_fallback<F>(self, f: F) -> Self
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        self.state.lock().fallback = Some(Arc::new(move |args: &A| Ok(f(args))));
        self
    }

    /// Call the mock, raising a thrown error at the caller
    #[track_caller]
    pub fn call(&self, args: A) -> R {
        match self.try_call(args) {
            Ok(value) => value,
            Err(err) => err.raise(),
        }
    }

    pub fn try_call(&self, args: A) -> Result<R, TestError> {
        let behaviour = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let matched = state.rules.iter_mut().find(|rule| {
                let args_match = rule.args.as_ref().map(|a| *a == args).unwrap_or(true);
                args_match && rule.remaining != Some(0)
            });
            match matched {
                Some(rule) => {
                    if let Some(remaining) = rule.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    Some(rule.behaviour.clone())
                }
                None => state.default.clone(),
            }
        };
        let returned = match behaviour {
            Some(behaviour) => behaviour.respond(&args),
            None => {
                let fallback = self.state.lock().fallback.clone();
                match fallback {
                    Some(fallback) => fallback(&args),
                    None => Err(TestError::error(format!(
                        "unexpected call to mock '{}'",
                        self.name
                    ))),
                }
            }
        };
        self.state.lock().invocations.push(Invocation {
            args,
            returned: returned.clone(),
        });
        returned
    }

    pub fn invocations(&self) -> Vec<Invocation<A, R>> {
        self.state.lock().invocations.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().invocations.len()
    }

    /// Rule for any call
    pub fn when_called(&self) -> RuleBuilder<'_, A, R> {
        RuleBuilder {
            mock: self,
            args: None,
            times: None,
        }
    }

    /// Rule for calls with exactly `args`
    pub fn when_called_with(&self, args: A) -> RuleBuilder<'_, A, R> {
        RuleBuilder {
            mock: self,
            args: Some(args),
            times: None,
        }
    }

    /// Default answer when no rule matches
    pub fn returning(&self, value: R) -> &Self {
        self.state.lock().default = Some(Behaviour::Return(value));
        self
    }

    pub fn throwing(&self, error: TestError) -> &Self {
        self.state.lock().default = Some(Behaviour::Throw(error));
        self
    }

    /// Forget recorded calls and configured answers
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.invocations.clear();
        state.rules.clear();
        state.default = None;
    }

    /// Restore the function this mock replaced, if any
    pub fn revert(&self) {
        let revert = self.state.lock().revert.take();
        if let Some(revert) = revert {
            revert();
        }
    }

    fn push_rule(&self, rule: Rule<A, R>) {
        self.state.lock().rules.push(rule);
    }
}

/// Configures one answering rule of a [`MockFn`]
pub struct RuleBuilder<'a, A, R> {
    mock: &'a MockFn<A, R>,
    args: Option<A>,
    times: Option<usize>,
}

impl<'a, A, R> RuleBuilder<'a, A, R>
where
    A: Clone + PartialEq + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Only match the next `n` calls
    pub fn times(mut self, n: usize) -> Self {
        self.times = Some(n);
        self
    }

    pub fn once(self) -> Self {
        self.times(1)
    }

    pub fn returning(self, value: R) -> &'a MockFn<A, R> {
        self.finish(Behaviour::Return(value))
    }

    pub fn throwing(self, error: TestError) -> &'a MockFn<A, R> {
        self.finish(Behaviour::Throw(error))
    }

    /// Answer with a function of the arguments
    pub fn then<F>(self, f: F) -> &'a MockFn<A, R>
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        self.finish(Behaviour::Call(Arc::new(move |args: &A| Ok(f(args)))))
    }

    fn finish(self, behaviour: Behaviour<A, R>) -> &'a MockFn<A, R> {
        self.mock.push_rule(Rule {
            args: self.args,
            remaining: self.times,
            behaviour,
        });
        self.mock
    }
}

/// Create a free-standing mock
pub fn mock<A, R>(name: impl AsRef<str>) -> MockFn<A, R>
where
    A: Clone + PartialEq + Send + 'static,
    R: Clone + Send + 'static,
{
    MockFn::new(name)
}

/// A function that tests may replace with a mock
pub struct Mockable<A, R> {
    name: Arc<str>,
    original: Arc<dyn Fn(&A) -> R + Send + Sync>,
    current: Arc<Mutex<Option<MockFn<A, R>>>>,
}

impl<A, R> Mockable<A, R>
where
    A: Clone + PartialEq + Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new<F>(name: impl AsRef<str>, original: F) -> Self
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            original: Arc::new(original),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the function with a mock falling back to the original.
    ///
    /// Reverting puts back whatever was active before, so a mock installed
    /// inside another mock's scope restores the outer one. Inside a run the
    /// mock is reverted when the current node finishes.
    pub fn mock(&self) -> MockFn<A, R> {
        let original = self.original.clone();
        let mock = MockFn::new(&*self.name).with_fallback(move |args| original(args));

        let previous = self.current.lock().replace(mock.clone());
        let slot = self.current.clone();
        let revert: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            *slot.lock() = previous.clone();
        });
        mock.state.lock().revert = Some(revert);

        let scoped = mock.clone();
        if on_revert(move || scoped.revert()) {
            debug!("mock of '{}' scoped to the running node", self.name);
        }
        mock
    }

    /// Revert the active mock, restoring the one it replaced
    pub fn revert(&self) {
        let mock = self.current.lock().clone();
        if let Some(mock) = mock {
            mock.revert();
        }
    }

    pub fn is_mocked(&self) -> bool {
        self.current.lock().is_some()
    }

    #[track_caller]
    pub fn call(&self, args: A) -> R {
        let mock = self.current.lock().clone();
        match mock {
            Some(mock) => mock.call(args),
            None => (self.original)(&args),
        }
    }
}
