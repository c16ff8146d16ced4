use thiserror::Error;

use super::storage::StorageError;
use super::types::{LifecycleState, RuntimeKind};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid plugin id '{0}': expected <namespace>/<name>")]
    InvalidId(String),

    #[error("plugin '{0}' is not registered")]
    NotFound(String),

    #[error("plugin '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("plugin '{plugin}': {expected} capability requested but plugin runtime is {actual}")]
    WrongRuntime {
        plugin: String,
        expected: RuntimeKind,
        actual: RuntimeKind,
    },

    #[error("plugin '{plugin}': cannot {hook} from state {state}")]
    InvalidTransition {
        plugin: String,
        hook: &'static str,
        state: LifecycleState,
    },

    #[error("plugin '{plugin}': hook '{hook}' failed: {message}")]
    Hook {
        plugin: String,
        hook: String,
        message: String,
    },

    #[error("plugin '{plugin}': no task named '{task}'")]
    UnknownTask { plugin: String, task: String },

    #[error("plugin '{plugin}': task '{task}' has invalid cron expression '{cron}'")]
    InvalidCron {
        plugin: String,
        task: String,
        cron: String,
    },

    #[error("plugin '{plugin}': no endpoint for {method} {path}")]
    NoRoute {
        plugin: String,
        method: String,
        path: String,
    },

    #[error("plugin '{plugin}': endpoint {method} {path} declared more than once")]
    DuplicateRoute {
        plugin: String,
        method: String,
        path: String,
    },

    #[error("plugin '{plugin}' is not active (state {state})")]
    NotActive {
        plugin: String,
        state: LifecycleState,
    },

    #[error("plugin '{0}' is disabled")]
    Disabled(String),

    #[error("plugin configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PluginError {
    pub fn hook(plugin: impl ToString, hook: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Hook {
            plugin: plugin.to_string(),
            hook: hook.into(),
            message: format!("{:#}", err),
        }
    }
}
