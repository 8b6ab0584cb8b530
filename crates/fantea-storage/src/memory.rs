//! In-memory storage backend.
//!
//! Stores all data in a `BTreeMap` behind a `RwLock`. Nothing survives the
//! process. Used by unit tests and as the session-scoped client cache (the
//! `sessionStorage` analog, which by definition dies with its tab).

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError, validate_key};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// Cloning shares the underlying map. Data is sorted by key, which makes
/// prefix listing a `BTreeMap::range` walk.
///
/// # Examples
///
/// ```
/// # use fantea_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("sections/hero", br#"{"title":"Hi"}"#).await.unwrap();
/// let val = backend.get("sections/hero").await.unwrap();
/// assert!(val.is_some());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the backend holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        self.data
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        Ok(self.data.read().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("sections/nope").await.unwrap(), None);
        assert!(!backend.exists("sections/nope").await.unwrap());
    }

    #[tokio::test]
    async fn put_overwrites_whole_value() {
        let backend = MemoryBackend::new();
        backend.put("sections/hero", b"v1").await.unwrap();
        backend.put("sections/hero", b"v2").await.unwrap();
        assert_eq!(
            backend.get("sections/hero").await.unwrap(),
            Some(b"v2".to_vec())
        );
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("fantea_cms_data", b"{}").await.unwrap();
        backend.delete("fantea_cms_data").await.unwrap();
        backend.delete("fantea_cms_data").await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn list_filters_by_prefix_in_order() {
        let backend = MemoryBackend::new();
        backend.put("sections/team", b"1").await.unwrap();
        backend.put("sections/about", b"2").await.unwrap();
        backend.put("fantea_cache_version", b"3").await.unwrap();

        let keys = backend.list("sections/").await.unwrap();
        assert_eq!(keys, vec!["sections/about", "sections/team"]);
        assert_eq!(backend.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rejects_invalid_keys() {
        let backend = MemoryBackend::new();
        assert!(backend.put("../x", b"1").await.is_err());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let backend = MemoryBackend::new();
        let tab = backend.clone();
        backend.put("fantea_language", b"en").await.unwrap();
        assert_eq!(
            tab.get("fantea_language").await.unwrap(),
            Some(b"en".to_vec())
        );
    }
}
