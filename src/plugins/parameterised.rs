//! Parameterised tests
//!
//! Expands one declared node into a child result per parameter combination.
//! Each combination is appended to the positional test arguments.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::core::{
    order, Builder, Context, InterceptorOptions, Key, Next, Node, NodeOptions, OptionKey, Plugin,
    RunInterceptor,
};
use crate::error::{EngineError, TestError};
use crate::models::{ChildOptions, StageOptions, TestResult};

pub const PARAMETERS: OptionKey<Parameters> = Key::new("parameters");
pub const PARAMETER_FILTER: OptionKey<ParameterFilter> = Key::new("parameter filter");

/// Predicate excluding combinations before they run
pub type ParameterFilter = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// Accepted parameter shapes
#[derive(Clone, Debug, PartialEq)]
pub enum Parameters {
    /// One call per element; array elements are full argument vectors
    List(Vec<Value>),
    /// Like `List`, with repeated elements dropped
    Set(Vec<Value>),
    /// Cartesian product of sets; the first set varies slowest
    Product(Vec<Parameters>),
    /// A JSON array read like `List`
    Value(Value),
}

impl Parameters {
    pub fn list<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Self {
        Parameters::List(values.into_iter().map(Into::into).collect())
    }

    pub fn set<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Self {
        Parameters::Set(values.into_iter().map(Into::into).collect())
    }

    pub fn product(sets: impl IntoIterator<Item = Parameters>) -> Self {
        Parameters::Product(sets.into_iter().collect())
    }

    /// Argument vectors in enumeration order
    pub fn expand(&self) -> Result<Vec<Vec<Value>>, EngineError> {
        match self {
            Parameters::List(values) => Ok(values.iter().map(vector).collect()),
            Parameters::Set(values) => {
                let mut unique: Vec<&Value> = Vec::new();
                for value in values {
                    if !unique.contains(&value) {
                        unique.push(value);
                    }
                }
                Ok(unique.into_iter().map(vector).collect())
            }
            Parameters::Product(sets) => {
                let mut combinations: Vec<Vec<Value>> = vec![Vec::new()];
                for set in sets {
                    let set = match set {
                        Parameters::Set(_) => set.expand()?,
                        other => {
                            return Err(EngineError::InvalidParameters(format!(
                                "product expects sets, got {other}"
                            )))
                        }
                    };
                    combinations = combinations
                        .iter()
                        .flat_map(|prefix| {
                            set.iter().map(move |values| {
                                let mut combination = prefix.clone();
                                combination.extend(values.iter().cloned());
                                combination
                            })
                        })
                        .collect();
                }
                if sets.is_empty() {
                    combinations.clear();
                }
                Ok(combinations)
            }
            Parameters::Value(Value::Array(values)) => Ok(values.iter().map(vector).collect()),
            Parameters::Value(other) => Err(EngineError::InvalidParameters(format!(
                "expected an array, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameters::List(_) => write!(f, "list"),
            Parameters::Set(_) => write!(f, "set"),
            Parameters::Product(_) => write!(f, "product"),
            Parameters::Value(value) => write!(f, "{value}"),
        }
    }
}

fn vector(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values.clone(),
        other => vec![other.clone()],
    }
}

impl NodeOptions {
    pub fn parameters(self, parameters: Parameters) -> Self {
        self.with(&PARAMETERS, parameters)
    }

    pub fn parameter_filter<F>(self, filter: F) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        let filter: ParameterFilter = Arc::new(filter);
        self.with(&PARAMETER_FILTER, filter)
    }
}

struct Parameterised {
    /// Expansions with more combinations than this are boring
    boring_threshold: usize,
}

impl Parameterised {
    async fn run(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
        parameters: Parameters,
    ) {
        let mut combinations = match parameters.expand() {
            Ok(combinations) => combinations,
            Err(err) => {
                result.record_error(err.into());
                return;
            }
        };
        if let Some(filter) = node.options().get(&PARAMETER_FILTER) {
            combinations.retain(|combination| filter(combination));
        }
        if combinations.is_empty() {
            result
                .create_stage(StageOptions::default(), "parameters", || async {
                    Err::<(), _>(TestError::skip("no parameters"))
                })
                .await;
            return;
        }

        let options = ChildOptions {
            is_test: node.is_test(),
            boring: combinations.len() > self.boring_threshold,
        };
        debug!(
            "{:?} expands into {} combinations",
            node.name(),
            combinations.len()
        );
        for combination in combinations {
            let label = Value::Array(combination.clone()).to_string();
            let mut args = context.args();
            args.extend(combination);
            let context = context.with_args(args);
            result
                .create_child(Some(label), options, |child| next.proceed_in(context, child))
                .await;
        }
    }
}

impl RunInterceptor for Parameterised {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        context: Context,
        result: Arc<TestResult>,
        node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        match node.options().get(&PARAMETERS) {
            Some(parameters) if context.is_active() => {
                let parameters = parameters.clone();
                self.run(next, context, result, node, parameters).boxed()
            }
            _ => next.proceed(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ParameterisedPlugin {
    pub boring_threshold: usize,
}

impl Default for ParameterisedPlugin {
    fn default() -> Self {
        Self {
            boring_threshold: 10,
        }
    }
}

impl Plugin for ParameterisedPlugin {
    fn register(&self, builder: &mut Builder) {
        builder.add_run_interceptor(
            Arc::new(Parameterised {
                boring_threshold: self.boring_threshold,
            }),
            InterceptorOptions::order(order::PARAMETERISED).with_id("parameterised"),
        );
    }
}
