//! Plugin configuration: declared defaults, caller overrides, and the YAML
//! overrides file.
//!
//! Merging is shallow. A nested object in the overrides replaces the default
//! object wholesale; keys are never merged below the top level.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

use super::error::PluginError;
use super::types::PluginId;

pub const ENABLED_KEY: &str = "enabled";

pub fn merge(defaults: &Value, overrides: Option<&Value>) -> Result<Value, PluginError> {
    let mut merged: Map<String, Value> = match defaults {
        Value::Object(map) => map.clone(),
        other => return Err(PluginError::Config(format!("defaults must be an object, got {}", other))),
    };
    match overrides {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (key, value) in map {
                merged.insert(key.clone(), value.clone());
            }
        }
        Some(other) => return Err(PluginError::Config(format!("overrides must be an object, got {}", other))),
    }
    Ok(Value::Object(merged))
}

/// Plugins are enabled unless `enabled` is explicitly `false`
pub fn is_enabled(config: &Value) -> bool {
    config.get(ENABLED_KEY).and_then(Value::as_bool).unwrap_or(true)
}

/// Parse a YAML document mapping plugin id to an override object
pub fn parse_overrides(yaml: &str) -> Result<HashMap<PluginId, Value>, PluginError> {
    let raw: HashMap<String, Value> =
        serde_yaml::from_str(yaml).map_err(|e| PluginError::Config(format!("invalid overrides file: {}", e)))?;

    raw.into_iter()
        .map(|(id, value)| {
            if !value.is_object() {
                return Err(PluginError::Config(format!("overrides for '{}' must be a mapping", id)));
            }
            Ok((PluginId::parse(&id)?, value))
        })
        .collect()
}

pub fn load_overrides(path: impl AsRef<Path>) -> Result<HashMap<PluginId, Value>, PluginError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| PluginError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let overrides = parse_overrides(&text)?;
    tracing::info!("Loaded plugin overrides for {} plugins from {}", overrides.len(), path.display());
    Ok(overrides)
}
