//! Errors returned by storage backends.
//!
//! Variants name the record or directory involved; the `reason` is the
//! underlying I/O message.

/// A failed backend operation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend's root directory could not be created.
    #[error("cannot open storage directory '{path}': {reason}")]
    Open { path: String, reason: String },

    /// A record exists but could not be read.
    #[error("cannot read record '{key}': {reason}")]
    Read { key: String, reason: String },

    /// A record could not be written or moved into place.
    #[error("cannot write record '{key}': {reason}")]
    Write { key: String, reason: String },

    /// A record could not be removed.
    #[error("cannot delete record '{key}': {reason}")]
    Delete { key: String, reason: String },

    /// A directory scan failed.
    #[error("cannot list records under '{prefix}': {reason}")]
    List { prefix: String, reason: String },

    /// The key is empty, absolute, or escapes the storage root.
    #[error("unusable record key: {reason}")]
    InvalidKey { reason: String },
}
