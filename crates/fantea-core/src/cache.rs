//! Client-side key/value cache (the `localStorage` analog).
//!
//! Values are JSON or plain strings under fixed keys with no schema
//! versioning. A value that fails to parse is logged and treated as absent;
//! nothing downstream ever sees a parse error from the cache.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use fantea_storage::{StorageBackend, StorageError};

use crate::document::ContentDocument;

/// Serialized admin session.
pub const SESSION_KEY: &str = "fantea_admin_session";
/// Last known content document.
pub const CONTENT_KEY: &str = "fantea_cms_data";
/// Checksum of the cached content document.
pub const CACHE_VERSION_KEY: &str = "fantea_cache_version";
/// Selected UI language.
pub const LANGUAGE_KEY: &str = "fantea_language";
/// Unsaved editor preview data, keyed by section.
pub const PREVIEW_KEY: &str = "fantea_preview_data";

/// Typed access to a client cache backend.
#[derive(Clone)]
pub struct ClientCache {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache").finish_non_exhaustive()
    }
}

impl ClientCache {
    /// Wrap a storage backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Read and parse a JSON value. Malformed values read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] only if the backend itself fails.
    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "ignoring malformed cached value");
                Ok(None)
            }
        }
    }

    /// Serialize and store a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if serialization or the backend fails.
    pub async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
        self.backend.put(key, &bytes).await
    }

    /// Read a plain string value. Non-UTF-8 bytes read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn read_string(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .backend
            .get(key)
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok()))
    }

    /// Store a plain string value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn write_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.backend.put(key, value.as_bytes()).await
    }

    /// Remove a key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.delete(key).await
    }

    /// The cached content document, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn content(&self) -> Result<Option<ContentDocument>, StorageError> {
        self.read_json(CONTENT_KEY).await
    }

    /// The checksum stored alongside the cached document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn content_checksum(&self) -> Result<Option<String>, StorageError> {
        self.read_string(CACHE_VERSION_KEY).await
    }

    /// Cache a document together with its checksum.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn store_content(&self, document: &ContentDocument, checksum: &str) -> Result<(), StorageError> {
        self.write_json(CONTENT_KEY, document).await?;
        self.write_string(CACHE_VERSION_KEY, checksum).await
    }

    /// Selected UI language, if set.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn language(&self) -> Result<Option<String>, StorageError> {
        self.read_string(LANGUAGE_KEY).await
    }

    /// Persist the selected UI language.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn set_language(&self, language: &str) -> Result<(), StorageError> {
        self.write_string(LANGUAGE_KEY, language).await
    }
}
