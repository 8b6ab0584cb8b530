//! The content document: section name → section object.
//!
//! A section is an arbitrary JSON object. On save the store injects three
//! metadata fields into the object itself: `lastModified`, `modifiedBy` and
//! `revision`. They are advisory apart from `revision`, which backs
//! conditional writes.
//!
//! These three names are reserved. A section's own field with one of these
//! names is replaced on save and removed by [`strip_metadata`], so content
//! must not use them.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Metadata key holding the RFC 3339 timestamp of the last save.
pub const LAST_MODIFIED: &str = "lastModified";
/// Metadata key holding the free-text author of the last save.
pub const MODIFIED_BY: &str = "modifiedBy";
/// Metadata key holding the section revision counter.
pub const REVISION: &str = "revision";

const MAX_SECTION_NAME_LEN: usize = 64;

/// The full content document. Keys iterate (and serialize) in sorted order.
///
/// Section objects may not carry content under [`LAST_MODIFIED`],
/// [`MODIFIED_BY`] or [`REVISION`]; the store owns those keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDocument {
    sections: BTreeMap<String, Value>,
}

impl ContentDocument {
    /// An empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from a JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        match value {
            Value::Object(map) => Ok(Self {
                sections: map.into_iter().collect(),
            }),
            other => Err(StoreError::Corrupt {
                key: "document".to_owned(),
                reason: format!("expected a JSON object, got {}", type_name(&other)),
            }),
        }
    }

    /// Convert into a JSON object value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.sections
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Look up a section.
    #[must_use]
    pub fn get(&self, section: &str) -> Option<&Value> {
        self.sections.get(section)
    }

    /// Insert or replace a whole section.
    pub fn insert(&mut self, section: impl Into<String>, data: Value) -> Option<Value> {
        self.sections.insert(section.into(), data)
    }

    /// Remove a section.
    pub fn remove(&mut self, section: &str) -> Option<Value> {
        self.sections.remove(section)
    }

    /// Iterate sections in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.sections.iter()
    }

    /// Section names in sorted order.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether the document has no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl FromIterator<(String, Value)> for ContentDocument {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            sections: iter.into_iter().collect(),
        }
    }
}

/// Metadata stamped onto a section by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMetadata {
    /// When the section was last saved.
    pub last_modified: DateTime<Utc>,
    /// Who saved it. Free text, not verified.
    pub modified_by: String,
    /// Save counter, starting at 1.
    pub revision: u64,
}

impl SectionMetadata {
    /// Read metadata back out of a stored section object.
    ///
    /// Sections written before revisions existed read as revision 0.
    #[must_use]
    pub fn read(section: &Value) -> Option<Self> {
        let obj = section.as_object()?;
        let last_modified = obj
            .get(LAST_MODIFIED)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        let modified_by = obj
            .get(MODIFIED_BY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let revision = obj.get(REVISION).and_then(Value::as_u64).unwrap_or(0);
        Some(Self {
            last_modified,
            modified_by,
            revision,
        })
    }

    /// The recorded author of a section, even when its timestamp is missing
    /// or unreadable. Empty authors read as `None`.
    #[must_use]
    pub fn recorded_author(section: &Value) -> Option<&str> {
        section
            .get(MODIFIED_BY)
            .and_then(Value::as_str)
            .filter(|author| !author.is_empty())
    }

    /// Write the metadata fields into a section object, replacing old values.
    pub fn stamp(&self, section: &mut Map<String, Value>) {
        section.insert(
            LAST_MODIFIED.to_owned(),
            Value::String(
                self.last_modified
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        );
        section.insert(
            MODIFIED_BY.to_owned(),
            Value::String(self.modified_by.clone()),
        );
        section.insert(REVISION.to_owned(), Value::from(self.revision));
    }
}

/// Return a copy of a section with the injected metadata fields removed.
#[must_use]
pub fn strip_metadata(section: &Value) -> Value {
    match section {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .filter(|(k, _)| !matches!(k.as_str(), LAST_MODIFIED | MODIFIED_BY | REVISION))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Check that a section name is safe to use as a storage key segment.
///
/// # Errors
///
/// Returns [`StoreError::InvalidSection`] for empty, over-long, or
/// non-`[A-Za-z0-9_-]` names.
pub fn validate_section_name(name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        Some("must not be empty".to_owned())
    } else if name.len() > MAX_SECTION_NAME_LEN {
        Some(format!("longer than {MAX_SECTION_NAME_LEN} characters"))
    } else if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        Some("may only contain alphanumeric characters, '_' and '-'".to_owned())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidSection {
            name: name.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn document_serializes_with_sorted_keys() {
        let mut doc = ContentDocument::new();
        doc.insert("team", json!({"b": 1}));
        doc.insert("about", json!({"a": 1}));
        let text = serde_json::to_string(&doc).unwrap();
        assert_eq!(text, r#"{"about":{"a":1},"team":{"b":1}}"#);
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(ContentDocument::from_value(json!([1, 2])).is_err());
        let doc = ContentDocument::from_value(json!({"hero": {"title": "X"}})).unwrap();
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn stamp_and_read_metadata() {
        let meta = SectionMetadata {
            last_modified: Utc::now(),
            modified_by: "admin".to_owned(),
            revision: 3,
        };
        let mut obj = Map::new();
        obj.insert("title".to_owned(), json!("X"));
        meta.stamp(&mut obj);

        let read = SectionMetadata::read(&Value::Object(obj.clone())).unwrap();
        assert_eq!(read.modified_by, "admin");
        assert_eq!(read.revision, 3);
        assert_eq!(
            read.last_modified.timestamp_millis(),
            meta.last_modified.timestamp_millis()
        );

        assert_eq!(strip_metadata(&Value::Object(obj)), json!({"title": "X"}));
    }

    #[test]
    fn author_survives_without_a_timestamp() {
        let untimed = json!({"title": "X", "modifiedBy": "editor"});
        assert!(SectionMetadata::read(&untimed).is_none());
        assert_eq!(SectionMetadata::recorded_author(&untimed), Some("editor"));

        let garbled = json!({"lastModified": "yesterday", "modifiedBy": "editor"});
        assert_eq!(SectionMetadata::recorded_author(&garbled), Some("editor"));
        assert_eq!(SectionMetadata::recorded_author(&json!({"modifiedBy": ""})), None);
    }

    #[test]
    fn section_names_are_checked() {
        assert!(validate_section_name("hero").is_ok());
        assert!(validate_section_name("team-members_2").is_ok());
        assert!(validate_section_name("").is_err());
        assert!(validate_section_name("../hero").is_err());
        assert!(validate_section_name("a b").is_err());
        assert!(validate_section_name(&"x".repeat(65)).is_err());
    }
}
