//! Content store: per-section JSON records over a [`StorageBackend`].
//!
//! Each section lives in its own record (`sections/<name>`), so two saves to
//! different sections can never clobber each other. Saves are serialized by
//! an in-process mutex and carry a revision counter; a caller that passes
//! `expected_revision` gets a conditional write and a
//! [`StoreError::RevisionConflict`] if someone saved in between. Without it
//! a save is last-writer-wins for that one section.
//!
//! Snapshots of the whole document can be written to a backups directory
//! as `cms-data-<timestamp>.json` and verified later.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use fantea_storage::StorageBackend;

use crate::checksum::checksum;
use crate::document::{
    ContentDocument, SectionMetadata, type_name, validate_section_name,
};
use crate::error::StoreError;

/// Storage prefix for section records.
const SECTION_PREFIX: &str = "sections/";

/// Name of the single-file document written by older deployments.
pub const LEGACY_DOCUMENT_FILE: &str = "cms-data.json";

const BACKUP_PREFIX: &str = "cms-data-";
const BACKUP_SUFFIX: &str = ".json";

/// A request to replace one section.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// Section name.
    pub section: String,
    /// New section contents. Must be a JSON object; reserved metadata keys
    /// in it are replaced.
    pub data: Value,
    /// Free-text author recorded as `modifiedBy`.
    pub user: String,
    /// Only write if the stored revision equals this value.
    pub expected_revision: Option<u64>,
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSection {
    /// Section name.
    pub section: String,
    /// Revision after the save.
    pub revision: u64,
    /// Timestamp stamped onto the section.
    pub last_modified: DateTime<Utc>,
}

/// Summary of a verified backup file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    /// Number of sections in the snapshot.
    pub sections: usize,
    /// Sections without readable `lastModified` metadata.
    pub missing_metadata: Vec<String>,
    /// Change-detection checksum of the snapshot.
    pub checksum: String,
}

/// Section-granular content store.
pub struct ContentStore {
    storage: Arc<dyn StorageBackend>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore").finish_non_exhaustive()
    }
}

impl ContentStore {
    /// Create a store over the given backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the whole document. An empty store yields an empty document.
    ///
    /// Unparseable records are logged and left out rather than failing the
    /// whole load.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend fails.
    pub async fn load_all(&self) -> Result<ContentDocument, StoreError> {
        let keys = self.storage.list(SECTION_PREFIX).await?;
        let mut document = ContentDocument::new();

        for key in keys {
            let Some(name) = key.strip_prefix(SECTION_PREFIX) else {
                continue;
            };
            if name.contains('/') {
                continue;
            }
            match self.read_record(&key).await {
                Ok(Some(value)) => {
                    document.insert(name, value);
                }
                Ok(None) => {}
                Err(StoreError::Corrupt { key, reason }) => {
                    warn!(key = %key, reason = %reason, "skipping corrupt section record");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(document)
    }

    /// Load one section, or `None` if it has never been saved.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidSection`] for a bad name.
    /// - [`StoreError::Corrupt`] if the record is not valid JSON.
    /// - [`StoreError::Storage`] if the backend fails.
    pub async fn load_section(&self, section: &str) -> Result<Option<Value>, StoreError> {
        validate_section_name(section)?;
        self.read_record(&section_key(section)).await
    }

    /// Replace a section with new data plus stamped metadata.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidSection`] for a bad name.
    /// - [`StoreError::NotAnObject`] if `data` is not an object.
    /// - [`StoreError::RevisionConflict`] if `expected_revision` is stale.
    /// - [`StoreError::Storage`] if the backend fails.
    pub async fn save_section(&self, request: SaveRequest) -> Result<SavedSection, StoreError> {
        validate_section_name(&request.section)?;
        let Value::Object(mut data) = request.data else {
            return Err(StoreError::NotAnObject {
                section: request.section,
            });
        };

        let key = section_key(&request.section);
        let _guard = self.write_lock.lock().await;

        let current = match self.read_record(&key).await {
            Ok(value) => value,
            Err(StoreError::Corrupt { reason, .. }) => {
                warn!(section = %request.section, reason = %reason, "overwriting corrupt section record");
                None
            }
            Err(e) => return Err(e),
        };
        let current_revision = current
            .as_ref()
            .and_then(SectionMetadata::read)
            .map_or(0, |m| m.revision);

        if let Some(expected) = request.expected_revision {
            if expected != current_revision {
                return Err(StoreError::RevisionConflict {
                    section: request.section,
                    expected,
                    actual: current_revision,
                });
            }
        }

        let meta = SectionMetadata {
            last_modified: Utc::now(),
            modified_by: request.user,
            revision: current_revision.saturating_add(1),
        };
        meta.stamp(&mut data);

        let bytes = serde_json::to_vec(&Value::Object(data)).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: format!("serialization failed: {e}"),
        })?;
        self.storage.put(&key, &bytes).await?;

        info!(
            section = %request.section,
            revision = meta.revision,
            modified_by = %meta.modified_by,
            "section saved"
        );

        Ok(SavedSection {
            section: request.section,
            revision: meta.revision,
            last_modified: meta.last_modified,
        })
    }

    /// Remove a section. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidSection`] for a bad name.
    /// - [`StoreError::Storage`] if the backend fails.
    pub async fn delete_section(&self, section: &str) -> Result<bool, StoreError> {
        validate_section_name(section)?;
        let key = section_key(section);
        let _guard = self.write_lock.lock().await;
        let existed = self.storage.exists(&key).await?;
        self.storage.delete(&key).await?;
        if existed {
            info!(section, "section deleted");
        }
        Ok(existed)
    }

    /// Import every section of a document, keeping each section's recorded
    /// author when it has one.
    ///
    /// # Errors
    ///
    /// Returns the first save error; sections before it stay imported.
    pub async fn import_document(
        &self,
        document: ContentDocument,
        default_user: &str,
    ) -> Result<usize, StoreError> {
        let mut imported = 0usize;
        for (section, data) in document.iter() {
            if !data.is_object() {
                warn!(section = %section, kind = type_name(data), "skipping non-object section on import");
                continue;
            }
            let user = SectionMetadata::recorded_author(data)
                .unwrap_or(default_user)
                .to_owned();
            self.save_section(SaveRequest {
                section: section.clone(),
                data: data.clone(),
                user,
                expected_revision: None,
            })
            .await?;
            imported = imported.saturating_add(1);
        }
        Ok(imported)
    }

    /// Import a legacy single-file document if the store is still empty.
    ///
    /// Returns `Ok(None)` when nothing was imported (file absent or the store
    /// already has sections).
    ///
    /// # Errors
    ///
    /// - [`StoreError::Corrupt`] if the legacy file is not a JSON object.
    /// - [`StoreError::Backup`] if the file exists but cannot be read.
    pub async fn import_legacy_file(&self, path: &Path) -> Result<Option<usize>, StoreError> {
        if !self.storage.list(SECTION_PREFIX).await?.is_empty() {
            return Ok(None);
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Backup {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let document = parse_document(&bytes, &path.display().to_string())?;
        let count = self.import_document(document, "import").await?;
        info!(path = %path.display(), sections = count, "legacy content document imported");
        Ok(Some(count))
    }

    /// Write a snapshot of the whole document into `dir` and prune old
    /// snapshots down to `retain`. Returns the new file's path.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Backup`] on directory or file I/O failure.
    /// - [`StoreError::Storage`] if loading the document fails.
    pub async fn backup(&self, dir: &Path, retain: usize) -> Result<PathBuf, StoreError> {
        let document = self.load_all().await?;
        let backup_err = |path: &Path, e: std::io::Error| StoreError::Backup {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| backup_err(dir, e))?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let path = dir.join(format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}"));
        let bytes = serde_json::to_vec_pretty(&document).map_err(|e| StoreError::Backup {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| backup_err(&path, e))?;

        let backups = list_backups(dir).await?;
        for stale in backups.iter().skip(retain.max(1)) {
            let stale_path = dir.join(stale);
            if let Err(e) = tokio::fs::remove_file(&stale_path).await {
                warn!(path = %stale_path.display(), error = %e, "failed to prune old backup");
            }
        }

        info!(path = %path.display(), sections = document.len(), "content backup written");
        Ok(path)
    }

    async fn read_record(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }
}

fn section_key(section: &str) -> String {
    format!("{SECTION_PREFIX}{section}")
}

fn parse_document(bytes: &[u8], origin: &str) -> Result<ContentDocument, StoreError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key: origin.to_owned(),
        reason: e.to_string(),
    })?;
    ContentDocument::from_value(value).map_err(|_| StoreError::Corrupt {
        key: origin.to_owned(),
        reason: "document is not a JSON object".to_owned(),
    })
}

/// Backup file names in `dir`, newest first. A missing directory is empty.
///
/// # Errors
///
/// Returns [`StoreError::Backup`] if the directory cannot be read.
pub async fn list_backups(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StoreError::Backup {
                path: dir.display().to_string(),
                reason: e.to_string(),
            });
        }
    };

    let mut names = Vec::new();
    loop {
        let entry = entries.next_entry().await.map_err(|e| StoreError::Backup {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let Some(entry) = entry else { break };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX) {
            names.push(name);
        }
    }
    names.sort_unstable_by(|a, b| b.cmp(a));
    Ok(names)
}

/// Parse a backup file and report on its contents.
///
/// # Errors
///
/// - [`StoreError::Backup`] if the file cannot be read.
/// - [`StoreError::Corrupt`] if it is not a JSON object of objects.
pub async fn verify_backup(path: &Path) -> Result<BackupReport, StoreError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| StoreError::Backup {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let document = parse_document(&bytes, &path.display().to_string())?;

    let mut missing_metadata = Vec::new();
    for (section, data) in document.iter() {
        if !data.is_object() {
            return Err(StoreError::Corrupt {
                key: format!("{}#{section}", path.display()),
                reason: format!("section is a {}, expected an object", type_name(data)),
            });
        }
        if SectionMetadata::read(data).is_none() {
            missing_metadata.push(section.clone());
        }
    }

    Ok(BackupReport {
        sections: document.len(),
        missing_metadata,
        checksum: checksum(&document),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::document::strip_metadata;
    use fantea_storage::{FileBackend, MemoryBackend};
    use serde_json::json;

    fn memory_store() -> ContentStore {
        ContentStore::new(Arc::new(MemoryBackend::new()))
    }

    fn save(section: &str, data: Value, user: &str) -> SaveRequest {
        SaveRequest {
            section: section.to_owned(),
            data,
            user: user.to_owned(),
            expected_revision: None,
        }
    }

    #[tokio::test]
    async fn empty_store_loads_empty_document() {
        let store = memory_store();
        assert!(store.load_all().await.unwrap().is_empty());
        assert_eq!(store.load_section("hero").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load_returns_data_with_metadata() {
        let store = memory_store();
        store
            .save_section(save("hero", json!({"title": "X"}), "admin"))
            .await
            .unwrap();

        let doc = store.load_all().await.unwrap();
        let hero = doc.get("hero").unwrap();
        assert_eq!(hero["title"], "X");
        assert_eq!(hero["modifiedBy"], "admin");
        assert_eq!(hero["revision"], 1);
        assert_eq!(strip_metadata(hero), json!({"title": "X"}));
    }

    #[tokio::test]
    async fn saving_same_data_twice_only_changes_metadata() {
        let store = memory_store();
        let data = json!({"title": "X", "cards": [{"t": 1}]});
        store.save_section(save("hero", data.clone(), "a")).await.unwrap();
        let first = store.load_section("hero").await.unwrap().unwrap();
        store.save_section(save("hero", data.clone(), "b")).await.unwrap();
        let second = store.load_section("hero").await.unwrap().unwrap();

        assert_eq!(strip_metadata(&first), strip_metadata(&second));
        assert_eq!(strip_metadata(&second), data);
        assert_eq!(second["revision"], 2);
        assert_eq!(second["modifiedBy"], "b");
    }

    #[tokio::test]
    async fn reserved_fields_in_content_are_overwritten() {
        let store = memory_store();
        let data = json!({
            "title": "X",
            "revision": 99,
            "modifiedBy": "someone else",
            "lastModified": "1999-01-01T00:00:00Z"
        });
        store.save_section(save("hero", data, "admin")).await.unwrap();

        let hero = store.load_section("hero").await.unwrap().unwrap();
        assert_eq!(hero["revision"], 1);
        assert_eq!(hero["modifiedBy"], "admin");
        assert_ne!(hero["lastModified"], "1999-01-01T00:00:00Z");
        assert_eq!(strip_metadata(&hero), json!({"title": "X"}));
    }

    #[tokio::test]
    async fn save_replaces_whole_section() {
        let store = memory_store();
        store
            .save_section(save("hero", json!({"title": "X", "subtitle": "Y"}), "a"))
            .await
            .unwrap();
        store
            .save_section(save("hero", json!({"title": "Z"}), "a"))
            .await
            .unwrap();
        let hero = store.load_section("hero").await.unwrap().unwrap();
        assert!(hero.get("subtitle").is_none());
    }

    #[tokio::test]
    async fn stale_expected_revision_conflicts() {
        let store = memory_store();
        store.save_section(save("hero", json!({"v": 1}), "a")).await.unwrap();

        let ok = store
            .save_section(SaveRequest {
                expected_revision: Some(1),
                ..save("hero", json!({"v": 2}), "a")
            })
            .await
            .unwrap();
        assert_eq!(ok.revision, 2);

        let err = store
            .save_section(SaveRequest {
                expected_revision: Some(1),
                ..save("hero", json!({"v": 3}), "b")
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::RevisionConflict { expected: 1, actual: 2, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_saves_to_different_sections_all_land() {
        let store = Arc::new(memory_store());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .save_section(save(&format!("s{i}"), json!({"i": i}), "a"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.load_all().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn rejects_non_object_and_bad_names() {
        let store = memory_store();
        assert!(matches!(
            store.save_section(save("hero", json!("x"), "a")).await,
            Err(StoreError::NotAnObject { .. })
        ));
        assert!(matches!(
            store.save_section(save("../x", json!({}), "a")).await,
            Err(StoreError::InvalidSection { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_record_is_skipped_on_load_all() {
        let backend = Arc::new(MemoryBackend::new());
        backend.put("sections/broken", b"{not json").await.unwrap();
        backend.put("sections/ok", br#"{"a":1}"#).await.unwrap();
        let store = ContentStore::new(backend);

        let doc = store.load_all().await.unwrap();
        assert_eq!(doc.section_names().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[tokio::test]
    async fn delete_removes_section() {
        let store = memory_store();
        store.save_section(save("hero", json!({}), "a")).await.unwrap();
        assert!(store.delete_section("hero").await.unwrap());
        assert!(!store.delete_section("hero").await.unwrap());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn legacy_file_imported_only_into_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join(LEGACY_DOCUMENT_FILE);
        std::fs::write(
            &legacy,
            r#"{
                "hero":{"title":"Old","modifiedBy":"editor"},
                "about":{"text":"Hi","modifiedBy":"writer","lastModified":"last tuesday"},
                "team":{"members":[]},
                "bad":"x"
            }"#,
        )
        .unwrap();

        let backend = Arc::new(FileBackend::open(dir.path()).unwrap().with_extension("json"));
        let store = ContentStore::new(backend);
        assert_eq!(store.import_legacy_file(&legacy).await.unwrap(), Some(3));
        let hero = store.load_section("hero").await.unwrap().unwrap();
        assert_eq!(hero["modifiedBy"], "editor");
        let about = store.load_section("about").await.unwrap().unwrap();
        assert_eq!(about["modifiedBy"], "writer");
        assert!(SectionMetadata::read(&about).is_some());
        let team = store.load_section("team").await.unwrap().unwrap();
        assert_eq!(team["modifiedBy"], "import");

        assert_eq!(store.import_legacy_file(&legacy).await.unwrap(), None);
    }

    #[tokio::test]
    async fn backups_are_written_pruned_and_verifiable() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        store.save_section(save("hero", json!({"t": 1}), "a")).await.unwrap();

        let mut last = PathBuf::new();
        for _ in 0..4 {
            last = store.backup(dir.path(), 2).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let names = list_backups(dir.path()).await.unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(dir.path().join(&names[0]), last);

        let report = verify_backup(&last).await.unwrap();
        assert_eq!(report.sections, 1);
        assert!(report.missing_metadata.is_empty());
        assert_eq!(report.checksum, checksum(&store.load_all().await.unwrap()));
    }

    #[tokio::test]
    async fn verify_rejects_non_object_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cms-data-x.json");
        std::fs::write(&path, r#"{"hero":[1,2]}"#).unwrap();
        assert!(matches!(
            verify_backup(&path).await,
            Err(StoreError::Corrupt { .. })
        ));
    }
}
