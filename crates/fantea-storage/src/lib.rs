//! Storage backend abstraction for Fantea CMS.
//!
//! This crate defines the [`StorageBackend`] trait, a pure key-value storage
//! interface that knows nothing about sections, sessions, or documents. The
//! content store in `fantea-core` layers JSON records on top of it, and the
//! client-side caches (the browser `localStorage`/`sessionStorage` analog)
//! use it directly.
//!
//! Two implementations are provided:
//!
//! - [`FileBackend`]: one file per key under a root directory, written with
//!   temp-file + rename so a crash never leaves a half-written record
//! - [`MemoryBackend`]: in-memory, for tests and session-scoped caches

mod error;
mod file;
mod memory;

pub use error::StorageError;
pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Byte records addressed by `/`-separated keys such as `sections/hero` or
/// `fantea_cms_data`. Every method validates its key with [`validate_key`].
/// Values are usually JSON but the backend never looks inside them.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Read a record; `Ok(None)` when it was never written or was deleted.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidKey`] or [`StorageError::Read`].
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace a record as a whole. Readers never see a partial value.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidKey`] or [`StorageError::Write`].
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove a record. Removing a missing record succeeds.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidKey`] or [`StorageError::Delete`].
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// [`StorageError::List`] if the scan fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Whether a record is present.
    ///
    /// # Errors
    ///
    /// Same as [`get`](StorageBackend::get).
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Validate a storage key.
///
/// Keys must be non-empty, must not start or end with `/`, and every segment
/// must be non-empty, not `.`/`..`, and free of NUL and backslash characters.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first violation.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey {
            reason: "key must not be empty".to_owned(),
        });
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidKey {
                reason: format!("invalid segment in key '{key}'"),
            });
        }
        if segment.contains('\0') || segment.contains('\\') {
            return Err(StorageError::InvalidKey {
                reason: format!("forbidden character in key '{key}'"),
            });
        }
    }
    Ok(())
}
