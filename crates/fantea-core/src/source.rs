//! The seam between client-side layers and the content service.
//!
//! The sync engine and the admin editor talk to a [`ContentSource`]. The CLI
//! provides an HTTP implementation; [`StoreSource`] calls a
//! [`ContentStore`] in-process, which is what tests and embedded setups use.

use std::sync::Arc;

use crate::document::ContentDocument;
use crate::error::SourceError;
use crate::store::{ContentStore, SaveRequest, SavedSection};
use crate::upload::{ImageUploader, UploadRequest};

/// Load/save access to the content service.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the full document, bypassing any intermediate caches.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`]; see [`SourceError::is_transient`].
    async fn fetch_document(&self) -> Result<ContentDocument, SourceError>;

    /// Replace one section.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the service rejects or cannot be reached.
    async fn save_section(&self, request: SaveRequest) -> Result<SavedSection, SourceError>;

    /// Upload an image and return its public URL.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the upload fails.
    async fn upload_image(&self, request: UploadRequest) -> Result<String, SourceError>;
}

/// A [`ContentSource`] that calls a local [`ContentStore`] directly.
#[derive(Debug, Clone)]
pub struct StoreSource {
    store: Arc<ContentStore>,
    uploader: Option<Arc<ImageUploader>>,
}

impl StoreSource {
    /// Wrap a store. Uploads fail until an uploader is attached.
    #[must_use]
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self {
            store,
            uploader: None,
        }
    }

    /// Attach an image uploader.
    #[must_use]
    pub fn with_uploader(mut self, uploader: Arc<ImageUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }
}

#[async_trait::async_trait]
impl ContentSource for StoreSource {
    async fn fetch_document(&self) -> Result<ContentDocument, SourceError> {
        Ok(self.store.load_all().await?)
    }

    async fn save_section(&self, request: SaveRequest) -> Result<SavedSection, SourceError> {
        Ok(self.store.save_section(request).await?)
    }

    async fn upload_image(&self, request: UploadRequest) -> Result<String, SourceError> {
        let uploader = self.uploader.as_ref().ok_or_else(|| SourceError::Status {
            status: 503,
            message: "image uploads are not configured".to_owned(),
        })?;
        Ok(uploader.store(&request).await?)
    }
}
