use std::sync::Arc;

use super::types::PluginId;

/// Logging collaborator handed to plugins
pub trait PluginLogger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);

    /// Sub-logger whose scope is appended to this one's
    fn child(&self, scope: &str) -> Arc<dyn PluginLogger>;
}

/// Forwards to `tracing` with `plugin` and `scope` fields
#[derive(Debug, Clone)]
pub struct TracingLogger {
    plugin: String,
    scope: String,
}

impl TracingLogger {
    pub fn new(id: &PluginId) -> Self {
        Self { plugin: id.to_string(), scope: String::new() }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn scoped(&self, scope: &str) -> Self {
        let scope = if self.scope.is_empty() {
            scope.to_string()
        } else {
            format!("{}:{}", self.scope, scope)
        };
        Self { plugin: self.plugin.clone(), scope }
    }
}

impl PluginLogger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "plugin", plugin = %self.plugin, scope = %self.scope, "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "plugin", plugin = %self.plugin, scope = %self.scope, "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "plugin", plugin = %self.plugin, scope = %self.scope, "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "plugin", plugin = %self.plugin, scope = %self.scope, "{}", message);
    }

    fn child(&self, scope: &str) -> Arc<dyn PluginLogger> {
        Arc::new(self.scoped(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_scopes_nest() {
        let root = TracingLogger::new(&PluginId::parse("acme/a").unwrap());
        assert_eq!(root.scope(), "");
        assert_eq!(root.scoped("tasks").scope(), "tasks");
        assert_eq!(root.scoped("tasks").scoped("rollup").scope(), "tasks:rollup");
        root.child("tasks").info("child loggers are usable as trait objects");
    }
}
