//! Admin editor: section forms ⇄ section JSON.
//!
//! Each section has a [`SectionSchema`]: an ordered list of scalar inputs
//! and repeated blocks. Inside a block, position carries meaning (the third
//! input of a program block is always its image). Collection does no
//! validation; an empty input collects as `""`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::binding::lookup;
use crate::cache::{ClientCache, PREVIEW_KEY};
use crate::checksum::checksum;
use crate::document::{ContentDocument, SectionMetadata};
use crate::error::EditorError;
use crate::source::ContentSource;
use crate::store::{SaveRequest, SavedSection};
use crate::upload::UploadRequest;

/// Input widget kind. Informational; collection treats all kinds as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Single-line text.
    Text,
    /// Multi-line text or HTML.
    TextArea,
    /// Image URL, usually filled by an upload.
    Image,
    /// Link target.
    Url,
}

/// One form input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    /// Dotted path inside the section (or inside a block item).
    pub name: String,
    /// Widget kind.
    pub kind: FieldKind,
}

/// A repeated group of inputs collected into an array of objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatBlock {
    /// Dotted path of the array.
    pub name: String,
    /// Inputs of one block, in positional order.
    pub fields: Vec<FormField>,
}

/// Form layout of one section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionSchema {
    /// Section name.
    pub section: String,
    /// Scalar inputs.
    #[serde(default)]
    pub fields: Vec<FormField>,
    /// Repeated blocks.
    #[serde(default)]
    pub blocks: Vec<RepeatBlock>,
}

/// Values currently in a section's form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormState {
    /// Scalar inputs by field name.
    pub values: BTreeMap<String, String>,
    /// Repeated blocks by block name; each block's inputs in schema order.
    pub blocks: BTreeMap<String, Vec<Vec<String>>>,
}

impl FormState {
    /// Set a scalar input.
    #[must_use]
    pub fn with_value(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_owned(), value.to_owned());
        self
    }

    /// Append one block of positional inputs.
    #[must_use]
    pub fn with_block(mut self, name: &str, inputs: &[&str]) -> Self {
        self.blocks
            .entry(name.to_owned())
            .or_default()
            .push(inputs.iter().map(|s| (*s).to_owned()).collect());
        self
    }
}

fn field(name: &str, kind: FieldKind) -> FormField {
    FormField {
        name: name.to_owned(),
        kind,
    }
}

fn text(name: &str) -> FormField {
    field(name, FieldKind::Text)
}

impl SectionSchema {
    fn new(section: &str, fields: Vec<FormField>, blocks: Vec<RepeatBlock>) -> Self {
        Self {
            section: section.to_owned(),
            fields,
            blocks,
        }
    }

    /// Forms of the public site's sections.
    #[must_use]
    pub fn site_default() -> Vec<Self> {
        use FieldKind::{Image, TextArea, Url};
        vec![
            Self::new(
                "hero",
                vec![
                    text("title"),
                    text("subtitle"),
                    field("backgroundImage", Image),
                    text("cta.text"),
                    field("cta.link", Url),
                ],
                vec![],
            ),
            Self::new(
                "about",
                vec![
                    text("title"),
                    field("description", TextArea),
                    field("image", Image),
                    field("mission", TextArea),
                    field("vision", TextArea),
                ],
                vec![],
            ),
            Self::new(
                "programs",
                vec![text("title"), field("intro", TextArea)],
                vec![RepeatBlock {
                    name: "items".to_owned(),
                    fields: vec![text("title"), field("description", TextArea), field("image", Image)],
                }],
            ),
            Self::new(
                "impact",
                vec![text("title")],
                vec![RepeatBlock {
                    name: "stats".to_owned(),
                    fields: vec![text("value"), text("label")],
                }],
            ),
            Self::new(
                "team",
                vec![text("title")],
                vec![RepeatBlock {
                    name: "members".to_owned(),
                    fields: vec![
                        text("name"),
                        text("role"),
                        field("bio", TextArea),
                        field("photo", Image),
                    ],
                }],
            ),
            Self::new(
                "contact",
                vec![text("title"), text("email"), text("phone"), field("address", TextArea)],
                vec![],
            ),
            Self::new(
                "footer",
                vec![text("copyright"), field("facebook", Url), field("instagram", Url)],
                vec![],
            ),
        ]
    }
}

/// Build a section object from form state.
#[must_use]
pub fn collect_section_data(schema: &SectionSchema, form: &FormState) -> Value {
    let mut root = Value::Object(Map::new());

    for f in &schema.fields {
        let value = form.values.get(&f.name).cloned().unwrap_or_default();
        set_path(&mut root, &f.name, Value::String(value));
    }

    for block in &schema.blocks {
        let items: Vec<Value> = form
            .blocks
            .get(&block.name)
            .map(|blocks| {
                blocks
                    .iter()
                    .map(|inputs| {
                        let mut item = Value::Object(Map::new());
                        for (i, f) in block.fields.iter().enumerate() {
                            let value = inputs.get(i).cloned().unwrap_or_default();
                            set_path(&mut item, &f.name, Value::String(value));
                        }
                        item
                    })
                    .collect()
            })
            .unwrap_or_default();
        set_path(&mut root, &block.name, Value::Array(items));
    }

    root
}

/// Populate form state from a section object.
///
/// Missing fields load as empty inputs; metadata and unknown fields are
/// ignored.
#[must_use]
pub fn load_section_data(schema: &SectionSchema, data: &Value) -> FormState {
    let mut form = FormState::default();

    for f in &schema.fields {
        form.values
            .insert(f.name.clone(), lookup(data, &f.name).map(input_text).unwrap_or_default());
    }

    for block in &schema.blocks {
        let blocks = lookup(data, &block.name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        block
                            .fields
                            .iter()
                            .map(|f| lookup(item, &f.name).map(input_text).unwrap_or_default())
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();
        form.blocks.insert(block.name.clone(), blocks);
    }

    form
}

fn input_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else { return };
        if segments.peek().is_none() {
            map.insert(segment.to_owned(), value);
            return;
        }
        current = map
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Result of an editor save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The content service accepted the save.
    Saved(SavedSection),
    /// The service failed; the data exists only in the local cache.
    LocalOnly {
        /// Why the remote save failed.
        error: String,
    },
}

/// An image reference returned by an editor upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Stored by the service at this public URL.
    Persisted(String),
    /// Upload failed; the data URL itself, usable for preview only.
    Transient(String),
}

impl ImageRef {
    /// The URL to put into an image input.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Persisted(url) | Self::Transient(url) => url,
        }
    }
}

/// Section editor bound to a content source and the local cache.
pub struct AdminEditor {
    source: Arc<dyn ContentSource>,
    cache: ClientCache,
    schemas: Vec<SectionSchema>,
}

impl std::fmt::Debug for AdminEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminEditor")
            .field("sections", &self.schemas.len())
            .finish_non_exhaustive()
    }
}

impl AdminEditor {
    /// Create an editor over `schemas`.
    #[must_use]
    pub fn new(source: Arc<dyn ContentSource>, cache: ClientCache, schemas: Vec<SectionSchema>) -> Self {
        Self {
            source,
            cache,
            schemas,
        }
    }

    /// Schema for a section.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::UnknownSection`].
    pub fn schema(&self, section: &str) -> Result<&SectionSchema, EditorError> {
        self.schemas
            .iter()
            .find(|s| s.section == section)
            .ok_or_else(|| EditorError::UnknownSection {
                section: section.to_owned(),
            })
    }

    /// Form state for a section of `document` (empty inputs if absent).
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::UnknownSection`].
    pub fn form_for(&self, section: &str, document: &ContentDocument) -> Result<FormState, EditorError> {
        let schema = self.schema(section)?;
        let data = document.get(section).cloned().unwrap_or(Value::Null);
        Ok(load_section_data(schema, &data))
    }

    /// Collect and save a section, mirroring it into the local cache.
    ///
    /// A failed remote save still updates the local cache and reports
    /// [`SaveOutcome::LocalOnly`].
    ///
    /// # Errors
    ///
    /// - [`EditorError::UnknownSection`] for a section without a schema.
    /// - [`EditorError::Cache`] if the local cache fails.
    pub async fn save(&self, section: &str, form: &FormState, user: &str) -> Result<SaveOutcome, EditorError> {
        let data = collect_section_data(self.schema(section)?, form);

        let result = self
            .source
            .save_section(SaveRequest {
                section: section.to_owned(),
                data: data.clone(),
                user: user.to_owned(),
                expected_revision: None,
            })
            .await;

        match result {
            Ok(saved) => {
                let mut stamped = data;
                if let Value::Object(map) = &mut stamped {
                    SectionMetadata {
                        last_modified: saved.last_modified,
                        modified_by: user.to_owned(),
                        revision: saved.revision,
                    }
                    .stamp(map);
                }
                self.mirror(section, stamped).await?;
                info!(section, revision = saved.revision, "section saved from editor");
                Ok(SaveOutcome::Saved(saved))
            }
            Err(e) => {
                warn!(section, error = %e, "remote save failed, keeping local copy only");
                self.mirror(section, data).await?;
                Ok(SaveOutcome::LocalOnly {
                    error: e.to_string(),
                })
            }
        }
    }

    /// Store collected form data as an unsaved preview.
    ///
    /// # Errors
    ///
    /// - [`EditorError::UnknownSection`] for a section without a schema.
    /// - [`EditorError::Cache`] if the local cache fails.
    pub async fn preview(&self, section: &str, form: &FormState) -> Result<Value, EditorError> {
        let data = collect_section_data(self.schema(section)?, form);
        let mut previews: Map<String, Value> =
            self.cache.read_json(PREVIEW_KEY).await?.unwrap_or_default();
        previews.insert(section.to_owned(), data.clone());
        self.cache.write_json(PREVIEW_KEY, &previews).await?;
        Ok(data)
    }

    /// Upload an image, falling back to the data URL itself on failure.
    pub async fn upload_image(&self, image_data: &str, filename: &str) -> ImageRef {
        let request = UploadRequest {
            image_data: image_data.to_owned(),
            filename: filename.to_owned(),
            category: None,
        };
        match self.source.upload_image(request).await {
            Ok(url) => ImageRef::Persisted(url),
            Err(e) => {
                warn!(filename, error = %e, "image upload failed, using transient preview");
                ImageRef::Transient(image_data.to_owned())
            }
        }
    }

    async fn mirror(&self, section: &str, data: Value) -> Result<(), EditorError> {
        let mut document = self.cache.content().await?.unwrap_or_default();
        document.insert(section, data);
        let sum = checksum(&document);
        self.cache.store_content(&document, &sum).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::error::SourceError;
    use crate::source::StoreSource;
    use crate::store::ContentStore;
    use crate::upload::ImageUploader;
    use fantea_storage::MemoryBackend;
    use serde_json::json;

    fn schema(section: &str) -> SectionSchema {
        SectionSchema::site_default()
            .into_iter()
            .find(|s| s.section == section)
            .unwrap()
    }

    #[test]
    fn load_then_collect_round_trips() {
        let programs = json!({
            "title": "Programs",
            "intro": "What we do",
            "items": [
                {"title": "Schools", "description": "Build", "image": "/a.png"},
                {"title": "Wells", "description": "", "image": ""}
            ]
        });
        let hero = json!({
            "title": "T", "subtitle": "S", "backgroundImage": "/b.png",
            "cta": {"text": "Donate", "link": "/donate"}
        });

        for (name, data) in [("programs", programs), ("hero", hero)] {
            let schema = schema(name);
            let form = load_section_data(&schema, &data);
            assert_eq!(collect_section_data(&schema, &form), data, "section {name}");
        }
    }

    #[test]
    fn empty_inputs_collect_as_empty_strings() {
        let schema = schema("contact");
        let data = collect_section_data(&schema, &FormState::default().with_value("email", "a@b.c"));
        assert_eq!(
            data,
            json!({"title": "", "email": "a@b.c", "phone": "", "address": ""})
        );
    }

    #[test]
    fn block_inputs_map_by_position() {
        let schema = schema("team");
        let form = FormState::default()
            .with_value("title", "Team")
            .with_block("members", &["Ann", "Chair", "Bio", "/ann.png"])
            .with_block("members", &["Bo"]);
        let data = collect_section_data(&schema, &form);
        assert_eq!(data["members"][0]["photo"], "/ann.png");
        assert_eq!(data["members"][1]["name"], "Bo");
        assert_eq!(data["members"][1]["bio"], "");
    }

    #[test]
    fn load_ignores_metadata_and_stringifies_scalars() {
        let schema = schema("impact");
        let form = load_section_data(
            &schema,
            &json!({"title": "Impact", "stats": [{"value": 12, "label": "x"}], "modifiedBy": "a"}),
        );
        assert_eq!(form.blocks["stats"], vec![vec!["12".to_owned(), "x".to_owned()]]);
        assert!(!form.values.contains_key("modifiedBy"));
    }

    struct DownSource;

    #[async_trait::async_trait]
    impl ContentSource for DownSource {
        async fn fetch_document(&self) -> Result<ContentDocument, SourceError> {
            Err(SourceError::Transport { reason: "down".to_owned() })
        }
        async fn save_section(&self, _: SaveRequest) -> Result<SavedSection, SourceError> {
            Err(SourceError::Transport { reason: "down".to_owned() })
        }
        async fn upload_image(&self, _: UploadRequest) -> Result<String, SourceError> {
            Err(SourceError::Transport { reason: "down".to_owned() })
        }
    }

    fn cache() -> ClientCache {
        ClientCache::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn save_persists_remotely_and_mirrors_locally() {
        let store = Arc::new(ContentStore::new(Arc::new(MemoryBackend::new())));
        let cache = cache();
        let editor = AdminEditor::new(
            Arc::new(StoreSource::new(Arc::clone(&store))),
            cache.clone(),
            SectionSchema::site_default(),
        );

        let form = FormState::default().with_value("title", "Hello");
        let outcome = editor.save("hero", &form, "admin").await.unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved(ref s) if s.revision == 1));

        let remote = store.load_section("hero").await.unwrap().unwrap();
        assert_eq!(remote["title"], "Hello");
        let local = cache.content().await.unwrap().unwrap();
        assert_eq!(local.get("hero").unwrap()["modifiedBy"], "admin");
        assert!(cache.content_checksum().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_save_falls_back_to_local_only() {
        let cache = cache();
        let editor = AdminEditor::new(Arc::new(DownSource), cache.clone(), SectionSchema::site_default());
        let outcome = editor
            .save("footer", &FormState::default().with_value("copyright", "2026"), "admin")
            .await
            .unwrap();

        assert!(matches!(outcome, SaveOutcome::LocalOnly { .. }));
        let local = cache.content().await.unwrap().unwrap();
        assert_eq!(local.get("footer").unwrap()["copyright"], "2026");
    }

    #[tokio::test]
    async fn unknown_sections_are_rejected() {
        let editor = AdminEditor::new(Arc::new(DownSource), cache(), SectionSchema::site_default());
        assert!(matches!(
            editor.save("nope", &FormState::default(), "a").await,
            Err(EditorError::UnknownSection { .. })
        ));
    }

    #[tokio::test]
    async fn preview_accumulates_sections() {
        let cache = cache();
        let editor = AdminEditor::new(Arc::new(DownSource), cache.clone(), SectionSchema::site_default());
        editor.preview("hero", &FormState::default().with_value("title", "A")).await.unwrap();
        editor.preview("footer", &FormState::default()).await.unwrap();

        let previews: Map<String, Value> = cache.read_json(PREVIEW_KEY).await.unwrap().unwrap();
        assert_eq!(previews.len(), 2);
        assert_eq!(previews["hero"]["title"], "A");
    }

    #[tokio::test]
    async fn upload_falls_back_to_transient_preview() {
        let editor = AdminEditor::new(Arc::new(DownSource), cache(), SectionSchema::site_default());
        let image = editor.upload_image("data:image/png;base64,AAAA", "x.png").await;
        assert_eq!(image, ImageRef::Transient("data:image/png;base64,AAAA".to_owned()));

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ContentStore::new(Arc::new(MemoryBackend::new())));
        let source = StoreSource::new(store).with_uploader(Arc::new(ImageUploader::new(dir.path(), 1024)));
        let editor = AdminEditor::new(Arc::new(source), cache(), SectionSchema::site_default());
        let image = editor.upload_image("data:image/png;base64,AAAA", "x.png").await;
        assert_eq!(image.url(), "/uploads/images/x.png");
    }
}
