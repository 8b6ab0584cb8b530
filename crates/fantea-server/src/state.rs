//! Shared application state for the Fantea content service.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use fantea_core::auth::CredentialTable;
use fantea_core::store::ContentStore;
use fantea_core::upload::ImageUploader;
use fantea_storage::FileBackend;

use crate::config::ServerConfig;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Section store.
    pub store: Arc<ContentStore>,
    /// Image upload writer; its root is also served at `/uploads`.
    pub uploader: Arc<ImageUploader>,
    /// Admin credentials.
    pub credentials: Arc<CredentialTable>,
    /// Where backups are written.
    pub backup_dir: PathBuf,
    /// Backups kept after each snapshot.
    pub backup_retain: usize,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backup_dir", &self.backup_dir)
            .field("backup_retain", &self.backup_retain)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Open the data directory, import a legacy document into an empty store
    /// and load the credential table.
    ///
    /// # Errors
    ///
    /// Fails if the data directory cannot be opened, the legacy document is
    /// unreadable, or the configured credential file is invalid.
    pub async fn build(config: &ServerConfig) -> anyhow::Result<Self> {
        let backend = FileBackend::open(&config.data_dir)
            .with_context(|| format!("failed to open data directory {}", config.data_dir.display()))?
            .with_extension("json");
        info!(path = %config.data_dir.display(), "using file storage");

        let store = Arc::new(ContentStore::new(Arc::new(backend)));

        let legacy = config.legacy_document();
        if let Some(count) = store
            .import_legacy_file(&legacy)
            .await
            .with_context(|| format!("failed to import {}", legacy.display()))?
        {
            info!(sections = count, "imported legacy content document");
        }

        let credentials = match &config.credentials_file {
            Some(path) => {
                let table = CredentialTable::load(path)
                    .await
                    .with_context(|| format!("failed to load credentials from {}", path.display()))?;
                info!(users = table.len(), "admin credentials loaded");
                table
            }
            None => {
                warn!("no credential file configured, admin login is disabled");
                CredentialTable::default()
            }
        };

        Ok(Self {
            store,
            uploader: Arc::new(ImageUploader::new(&config.uploads_dir, config.max_upload_bytes)),
            credentials: Arc::new(credentials),
            backup_dir: config.backup_dir(),
            backup_retain: config.backup_retain,
        })
    }
}
