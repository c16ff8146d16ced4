use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::PluginId;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    #[error("storage operation '{0}' is not supported")]
    Unsupported(&'static str),

    #[error("storage value for '{key}' could not be converted: {message}")]
    Serialization { key: String, message: String },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Key-value collaborator. Each operation is atomic for its key; there are no
/// cross-key transactions.
#[async_trait]
pub trait PluginStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn list(&self, _prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported("list"))
    }
}

impl dyn PluginStorage {
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::Serialization { key: key.to_string(), message: e.to_string() }),
            None => Ok(None),
        }
    }

    pub async fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)
            .map_err(|e| StorageError::Serialization { key: key.to_string(), message: e.to_string() })?;
        self.set(key, value).await
    }
}

/// Process-local storage; counts writes so callers can assert on side effects
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Value>>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of set/delete calls since creation
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl PluginStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let prefix = prefix.unwrap_or_default();
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Storage view confined to keys under `<plugin id>:`
pub struct ScopedStorage {
    inner: Arc<dyn PluginStorage>,
    prefix: String,
}

impl ScopedStorage {
    pub fn new(inner: Arc<dyn PluginStorage>, id: &PluginId) -> Self {
        Self { inner, prefix: format!("{}:", id) }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl PluginStorage for ScopedStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get(&self.key(key)).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.inner.set(&self.key(key), value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(&self.key(key)).await
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let scoped = self.key(prefix.unwrap_or_default());
        let keys = self.inner.list(Some(&scoped)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scoped_storage_isolates_plugins() {
        let shared: Arc<dyn PluginStorage> = Arc::new(MemoryStorage::new());
        let a = ScopedStorage::new(shared.clone(), &PluginId::parse("acme/a").unwrap());
        let b = ScopedStorage::new(shared.clone(), &PluginId::parse("acme/b").unwrap());

        a.set("count", json!(1)).await.unwrap();
        b.set("count", json!(2)).await.unwrap();

        assert_eq!(a.get("count").await.unwrap(), Some(json!(1)));
        assert_eq!(b.get("count").await.unwrap(), Some(json!(2)));
        assert_eq!(a.list(None).await.unwrap(), vec!["count".to_string()]);
        assert_eq!(shared.get("acme/a:count").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn typed_access_round_trips_through_json() {
        let storage: Arc<dyn PluginStorage> = Arc::new(MemoryStorage::new());
        storage.set_as("total", &42u64).await.unwrap();
        assert_eq!(storage.get_as::<u64>("total").await.unwrap(), Some(42));
        assert_eq!(storage.get_as::<u64>("missing").await.unwrap(), None);

        storage.set("label", json!("x")).await.unwrap();
        assert!(matches!(
            storage.get_as::<u64>("label").await,
            Err(StorageError::Serialization { .. })
        ));
    }

    #[tokio::test]
    async fn memory_storage_counts_writes() {
        let storage = MemoryStorage::new();
        storage.get("a").await.unwrap();
        storage.set("a", json!(1)).await.unwrap();
        storage.delete("a").await.unwrap();
        assert_eq!(storage.writes(), 2);
    }

    struct GetSetOnly;

    #[async_trait]
    impl PluginStorage for GetSetOnly {
        async fn get(&self, _key: &str) -> Result<Option<Value>, StorageError> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: Value) -> Result<(), StorageError> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn list_is_optional() {
        assert_eq!(GetSetOnly.list(None).await, Err(StorageError::Unsupported("list")));
    }
}
