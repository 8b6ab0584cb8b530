//! Image uploads from base64 data URLs.
//!
//! The admin editor sends `data:image/png;base64,...` plus a filename. The
//! uploader decodes it, writes it to `<root>/<category>/<filename>` and
//! returns the public URL `/uploads/<category>/<filename>`. Bare base64
//! without the `data:` header is accepted too.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::info;

use crate::error::UploadError;

/// Category used when the request does not name one.
pub const DEFAULT_CATEGORY: &str = "images";

/// Public URL prefix under which uploads are served.
pub const PUBLIC_PREFIX: &str = "/uploads";

/// An image upload request, as posted by the admin editor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// `data:` URL or bare base64.
    pub image_data: String,
    /// Requested filename; reduced to a safe basename.
    pub filename: String,
    /// Subdirectory; defaults to [`DEFAULT_CATEGORY`].
    #[serde(default)]
    pub category: Option<String>,
}

/// A decoded data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// MIME type from the header, if any.
    pub mime: Option<String>,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
}

/// Decode a base64 data URL (or bare base64).
///
/// # Errors
///
/// Returns [`UploadError::InvalidData`] for a non-image MIME type, a
/// non-base64 data URL, or undecodable payload.
pub fn decode_data_url(input: &str) -> Result<DecodedImage, UploadError> {
    let input = input.trim();
    let (mime, payload) = match input.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or_else(|| UploadError::InvalidData {
                reason: "data URL has no ',' separator".to_owned(),
            })?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| UploadError::InvalidData {
                    reason: "only base64 data URLs are supported".to_owned(),
                })?;
            if !mime.starts_with("image/") {
                return Err(UploadError::InvalidData {
                    reason: format!("unsupported media type '{mime}'"),
                });
            }
            (Some(mime.to_owned()), payload)
        }
        None => (None, input),
    };

    if payload.is_empty() {
        return Err(UploadError::InvalidData {
            reason: "empty payload".to_owned(),
        });
    }

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| UploadError::InvalidData {
            reason: e.to_string(),
        })?;
    Ok(DecodedImage { mime, bytes })
}

/// Reduce a client filename to a safe basename.
///
/// Path components are dropped; characters outside `[A-Za-z0-9._-]` become
/// `_`. Names that end up empty or dot-only are rejected.
///
/// # Errors
///
/// Returns [`UploadError::InvalidFilename`].
pub fn sanitize_filename(filename: &str) -> Result<String, UploadError> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') || cleaned.starts_with('.') {
        return Err(UploadError::InvalidFilename {
            filename: filename.to_owned(),
        });
    }
    Ok(cleaned)
}

fn validate_category(category: &str) -> Result<(), UploadError> {
    let ok = !category.is_empty()
        && category
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(UploadError::InvalidCategory {
            category: category.to_owned(),
        })
    }
}

/// Writes uploaded images under a root directory.
#[derive(Debug, Clone)]
pub struct ImageUploader {
    root: PathBuf,
    max_bytes: usize,
}

impl ImageUploader {
    /// Create an uploader writing below `root`, rejecting decoded images
    /// larger than `max_bytes`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>, max_bytes: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_bytes,
        }
    }

    /// Root directory of stored uploads.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Largest accepted decoded image, in bytes.
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Decode and store an image, returning its public URL.
    ///
    /// An existing file with the same name is overwritten.
    ///
    /// # Errors
    ///
    /// Returns an [`UploadError`] for bad input or I/O failure.
    pub async fn store(&self, request: &UploadRequest) -> Result<String, UploadError> {
        let category = request
            .category
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY);
        validate_category(category)?;
        let filename = sanitize_filename(&request.filename)?;
        let image = decode_data_url(&request.image_data)?;

        if image.bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: image.bytes.len(),
                limit: self.max_bytes,
            });
        }

        let dir = self.root.join(category);
        let path = dir.join(&filename);
        let io_err = |e: std::io::Error| UploadError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
        tokio::fs::write(&path, &image.bytes).await.map_err(io_err)?;

        info!(
            category,
            filename = %filename,
            bytes = image.bytes.len(),
            mime = image.mime.as_deref().unwrap_or("unknown"),
            "image uploaded"
        );

        Ok(format!("{PUBLIC_PREFIX}/{category}/{filename}"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    // 1x1 transparent PNG.
    const PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    fn request(filename: &str) -> UploadRequest {
        UploadRequest {
            image_data: format!("data:image/png;base64,{PNG}"),
            filename: filename.to_owned(),
            category: None,
        }
    }

    #[test]
    fn decodes_data_url_and_bare_base64() {
        let img = decode_data_url(&format!("data:image/png;base64,{PNG}")).unwrap();
        assert_eq!(img.mime.as_deref(), Some("image/png"));
        assert_eq!(&img.bytes[1..4], b"PNG");
        assert!(decode_data_url(PNG).unwrap().mime.is_none());
    }

    #[test]
    fn rejects_non_image_and_garbage() {
        assert!(decode_data_url("data:text/html;base64,PGI+").is_err());
        assert!(decode_data_url("data:image/png,rawdata").is_err());
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
        assert!(decode_data_url("").is_err());
    }

    #[test]
    fn filenames_are_reduced_to_safe_basenames() {
        assert_eq!(sanitize_filename("x.png").unwrap(), "x.png");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\a\\my pic.jpg").unwrap(), "my_pic.jpg");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename(".hidden").is_err());
        assert!(sanitize_filename("dir/").is_err());
    }

    #[tokio::test]
    async fn stores_under_category_and_returns_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = ImageUploader::new(dir.path(), 1024);
        let url = uploader.store(&request("x.png")).await.unwrap();
        assert_eq!(url, "/uploads/images/x.png");
        assert!(dir.path().join("images").join("x.png").is_file());
    }

    #[tokio::test]
    async fn enforces_size_limit_and_category_rules() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = ImageUploader::new(dir.path(), 8);
        assert!(matches!(
            uploader.store(&request("x.png")).await,
            Err(UploadError::TooLarge { .. })
        ));

        let uploader = ImageUploader::new(dir.path(), 1024);
        let mut req = request("x.png");
        req.category = Some("../etc".to_owned());
        assert!(matches!(
            uploader.store(&req).await,
            Err(UploadError::InvalidCategory { .. })
        ));
    }
}
