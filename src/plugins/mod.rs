//! Built-in plugins
//!
//! Each plugin registers node types, options, scopes or interceptors on a
//! [`Builder`]. [`standard`] bundles all of them.

pub mod describe;
pub mod focus;
pub mod ignore;
pub mod lifecycle;
pub mod mock_scope;
pub mod output_capture;
pub mod parameterised;
pub mod repeat;
pub mod retry;
pub mod stop_at_first_failure;
pub mod timeout;

use std::time::Duration;

use crate::config::RunnerConfig;
use crate::core::{Builder, Plugin};

pub use describe::Describe;
pub use focus::{FocusPlugin, FocusState, FOCUS};
pub use ignore::{IgnorePlugin, IGNORE};
pub use lifecycle::{HookContext, HookKind, Hooks, IntoHookOutcome, LifecyclePlugin, Teardown, HOOKS};
pub use mock_scope::{on_revert, MockScopePlugin};
pub use output_capture::{
    get_output, get_output_bytes, get_stderr, get_stdout, write_stderr, write_stdout,
    OutputCapturePlugin,
};
pub use parameterised::{ParameterFilter, Parameters, ParameterisedPlugin, PARAMETERS, PARAMETER_FILTER};
pub use repeat::{RepeatOptions, RepeatPlugin, REPEAT};
pub use retry::{RetryPlugin, RETRY};
pub use stop_at_first_failure::{StopAtFirstFailurePlugin, STOP_AT_FIRST_FAILURE};
pub use timeout::{TimeoutPlugin, TIMEOUT};

/// Every built-in plugin, configured from a [`RunnerConfig`]
#[derive(Clone, Copy, Debug)]
pub struct StandardPlugins {
    pub default_timeout: Option<Duration>,
    pub boring_threshold: usize,
}

pub fn standard(config: &RunnerConfig) -> StandardPlugins {
    StandardPlugins {
        default_timeout: config.default_timeout(),
        boring_threshold: config.boring_threshold,
    }
}

impl Plugin for StandardPlugins {
    fn register(&self, builder: &mut Builder) {
        builder
            .add_plugin(Describe)
            .add_plugin(LifecyclePlugin)
            .add_plugin(FocusPlugin)
            .add_plugin(IgnorePlugin)
            .add_plugin(StopAtFirstFailurePlugin)
            .add_plugin(RetryPlugin)
            .add_plugin(RepeatPlugin)
            .add_plugin(ParameterisedPlugin {
                boring_threshold: self.boring_threshold,
            })
            .add_plugin(TimeoutPlugin {
                default: self.default_timeout,
            })
            .add_plugin(OutputCapturePlugin)
            .add_plugin(MockScopePlugin);
    }
}
