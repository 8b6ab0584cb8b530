//! Error types for `fantea-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Auth errors never include the submitted password.

use fantea_storage::StorageError;

/// Errors from the content store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The section name is not usable as a storage key.
    #[error("invalid section name '{name}': {reason}")]
    InvalidSection { name: String, reason: String },

    /// Section data was not a JSON object.
    #[error("section '{section}' data must be a JSON object")]
    NotAnObject { section: String },

    /// A conditional write saw a different revision than the caller expected.
    #[error("section '{section}' is at revision {actual}, expected {expected}")]
    RevisionConflict {
        section: String,
        expected: u64,
        actual: u64,
    },

    /// A stored record or backup could not be parsed.
    #[error("corrupt record '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// Backup directory I/O failed.
    #[error("backup failed at '{path}': {reason}")]
    Backup { path: String, reason: String },

    /// The underlying storage backend returned an error.
    #[error("content storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from a [`ContentSource`](crate::source::ContentSource).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The transport failed (connection refused, timeout, DNS).
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// The service answered with a non-success status.
    #[error("content service returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("malformed response: {reason}")]
    Malformed { reason: String },

    /// The in-process store rejected the request.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The in-process uploader rejected the request.
    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl SourceError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Malformed { .. } | Self::Store(_) | Self::Upload(_) => false,
        }
    }
}

/// Errors from a broadcast transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport has no live receivers.
    #[error("transport '{name}' has no receivers")]
    NoReceivers { name: String },

    /// The transport failed to deliver.
    #[error("transport '{name}' failed: {reason}")]
    Failed { name: String, reason: String },
}

/// Errors from the auth module.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Username or password did not match.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// There is no live session.
    #[error("not logged in")]
    NotAuthenticated,

    /// The session outlived its window.
    #[error("session expired at {expired_at}")]
    Expired { expired_at: String },

    /// The session lacks the required permission.
    #[error("permission '{permission}' denied for user '{username}'")]
    Forbidden {
        username: String,
        permission: String,
    },

    /// The credential table could not be loaded.
    #[error("invalid credential table: {reason}")]
    InvalidCredentialTable { reason: String },

    /// The remote authenticator could not be reached.
    #[error("auth backend error: {reason}")]
    Backend { reason: String },

    /// Session persistence failed.
    #[error("session storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from image upload handling.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The payload is not a base64 image data URL.
    #[error("invalid image data: {reason}")]
    InvalidData { reason: String },

    /// The filename is empty or unusable after sanitizing.
    #[error("invalid filename '{filename}'")]
    InvalidFilename { filename: String },

    /// The category is not a single safe path segment.
    #[error("invalid upload category '{category}'")]
    InvalidCategory { category: String },

    /// The decoded image exceeds the configured limit.
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    /// Writing the file failed.
    #[error("failed to write '{path}': {reason}")]
    Io { path: String, reason: String },
}

/// Errors from the admin editor.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    /// No form schema exists for the section.
    #[error("no editor schema for section '{section}'")]
    UnknownSection { section: String },

    /// The local cache failed.
    #[error("editor cache error: {0}")]
    Cache(#[from] StorageError),
}
