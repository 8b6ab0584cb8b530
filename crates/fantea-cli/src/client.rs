//! HTTP client for the Fantea content service.
//!
//! [`Client`] is both the raw JSON client used by the simple commands and the
//! [`ContentSource`] / [`Authenticator`] that the sync engine, the editor and
//! the session layer run against.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use fantea_core::auth::{Authenticator, Identity, Session};
use fantea_core::document::ContentDocument;
use fantea_core::error::{AuthError, SourceError};
use fantea_core::source::ContentSource;
use fantea_core::store::{SaveRequest, SavedSection};
use fantea_core::upload::UploadRequest;

pub struct Client {
    http: reqwest::Client,
    addr: String,
}

impl Client {
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            addr: addr.trim_end_matches('/').to_owned(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.addr)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    pub async fn post_no_body(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(path))
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .delete(self.url(path))
            .send()
            .await
            .context("request failed")?;
        handle_response(resp).await
    }

    async fn post_typed<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, SourceError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode(resp).await
    }
}

async fn handle_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let body = resp.text().await.context("failed to read response body")?;
    if !status.is_success() {
        bail!("server returned {status}: {}", error_message(&body));
    }
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).context("failed to parse response JSON")
}

/// The `error` field of a failure envelope, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| body.to_owned())
}

fn transport(e: reqwest::Error) -> SourceError {
    SourceError::Transport {
        reason: e.to_string(),
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, SourceError> {
    let status = resp.status();
    let body = resp.text().await.map_err(transport)?;
    if !status.is_success() {
        return Err(SourceError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    serde_json::from_str(&body).map_err(|e| SourceError::Malformed {
        reason: e.to_string(),
    })
}

// ── Response envelopes ───────────────────────────────────────────────

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveReply {
    revision: u64,
    last_modified: DateTime<Utc>,
}

#[derive(Deserialize)]
struct UploadReply {
    url: String,
}

#[derive(Deserialize)]
struct LoginReply {
    session: Session,
}

#[async_trait::async_trait]
impl ContentSource for Client {
    async fn fetch_document(&self) -> Result<ContentDocument, SourceError> {
        // Query stamp and header both defeat intermediate caches.
        let stamp = Utc::now().timestamp_millis();
        debug!(addr = %self.addr, "fetching content document");
        let resp = self
            .http
            .get(self.url(&format!("/api/cms/load?t={stamp}")))
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(transport)?;
        let envelope: DataEnvelope<ContentDocument> = decode(resp).await?;
        Ok(envelope.data)
    }

    async fn save_section(&self, request: SaveRequest) -> Result<SavedSection, SourceError> {
        let body = json!({
            "section": &request.section,
            "data": &request.data,
            "user": &request.user,
            "expectedRevision": request.expected_revision,
        });
        let reply: SaveReply = self.post_typed("/api/cms/save", &body).await?;
        debug!(section = %request.section, revision = reply.revision, "section saved");
        Ok(SavedSection {
            section: request.section,
            revision: reply.revision,
            last_modified: reply.last_modified,
        })
    }

    async fn upload_image(&self, request: UploadRequest) -> Result<String, SourceError> {
        let body = json!({
            "imageData": request.image_data,
            "filename": request.filename,
            "category": request.category,
        });
        let reply: UploadReply = self.post_typed("/api/upload/image", &body).await?;
        Ok(reply.url)
    }
}

#[async_trait::async_trait]
impl Authenticator for Client {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, AuthError> {
        let body = json!({ "username": username, "password": password });
        match self.post_typed::<LoginReply>("/api/auth/login", &body).await {
            Ok(reply) => Ok(Identity {
                username: reply.session.username,
                role: reply.session.role,
            }),
            Err(SourceError::Status { status: 401, .. }) => Err(AuthError::InvalidCredentials),
            Err(e) => Err(AuthError::Backend {
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn error_message_prefers_envelope_field() {
        assert_eq!(
            error_message(r#"{"success":false,"error":"bad section"}"#),
            "bad section"
        );
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
        assert_eq!(error_message(r#"{"detail":"x"}"#), r#"{"detail":"x"}"#);
    }

    #[test]
    fn trailing_slash_is_dropped_from_the_address() {
        let client = Client::new("http://localhost:3001/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/api/health"), "http://localhost:3001/api/health");
    }
}
