//! Server configuration for Fantea.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unparseable values fall back to their defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use fantea_core::store::LEGACY_DOCUMENT_FILE;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_BACKUP_RETAIN: usize = 10;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Local development.
    Development,
    /// Container deployment.
    Production,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable.
    Pretty,
}

/// Which browser origins may call the API cross-origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    /// Any origin.
    Any,
    /// Only these origins. An empty list allows same-origin requests only.
    List(Vec<String>),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Deployment environment.
    pub environment: Environment,
    /// Directory holding section records, backups and the legacy document.
    pub data_dir: PathBuf,
    /// Directory uploaded images are written to and served from.
    pub uploads_dir: PathBuf,
    /// Allowed CORS origins.
    pub cors_origins: CorsOrigins,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Backups kept after each snapshot.
    pub backup_retain: usize,
    /// Largest accepted decoded image.
    pub max_upload_bytes: usize,
    /// JSON credential table for admin login.
    pub credentials_file: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on (binds to `0.0.0.0`)
    /// - `FANTEA_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:3001`)
    /// - `FANTEA_ENV` or `NODE_ENV`: `production` or `development` (default)
    /// - `FANTEA_DATA_DIR`: data directory (default: `/app/data` in production, `./data` otherwise)
    /// - `FANTEA_UPLOADS_DIR`: uploads directory (default: `uploads` next to the data directory)
    /// - `FANTEA_CORS_ORIGINS`: comma-separated allowed origins, or `*` (default:
    ///   same-origin only in production, any otherwise)
    /// - `FANTEA_LOG_LEVEL`: log filter (default: `info`)
    /// - `FANTEA_LOG_FORMAT`: `json` or `pretty` (default: `json` in production, `pretty` otherwise)
    /// - `FANTEA_BACKUP_RETAIN`: backups kept (default: `10`)
    /// - `FANTEA_MAX_UPLOAD_BYTES`: image size limit (default: 10 MiB)
    /// - `FANTEA_CREDENTIALS_FILE`: credential table path (optional)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Priority: FANTEA_BIND_ADDR > PORT > default 127.0.0.1:3001
        let bind_addr = if let Some(addr) = lookup("FANTEA_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
        } else if let Some(port) = lookup("PORT") {
            SocketAddr::from(([0, 0, 0, 0], port.parse().unwrap_or(DEFAULT_PORT)))
        } else {
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
        };

        let environment = match lookup("FANTEA_ENV")
            .or_else(|| lookup("NODE_ENV"))
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            Some("production" | "prod") => Environment::Production,
            _ => Environment::Development,
        };

        let data_dir = lookup("FANTEA_DATA_DIR").map_or_else(
            || match environment {
                Environment::Production => PathBuf::from("/app/data"),
                Environment::Development => PathBuf::from("./data"),
            },
            PathBuf::from,
        );

        let uploads_dir = lookup("FANTEA_UPLOADS_DIR")
            .map_or_else(|| sibling_uploads_dir(&data_dir), PathBuf::from);

        let cors_origins = match lookup("FANTEA_CORS_ORIGINS") {
            Some(v) if v.trim() == "*" => CorsOrigins::Any,
            Some(v) => CorsOrigins::List(
                v.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_owned)
                    .collect(),
            ),
            None => match environment {
                Environment::Production => CorsOrigins::List(Vec::new()),
                Environment::Development => CorsOrigins::Any,
            },
        };

        let log_level = lookup("FANTEA_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let log_format = match lookup("FANTEA_LOG_FORMAT").as_deref() {
            Some("pretty" | "text") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            _ => match environment {
                Environment::Production => LogFormat::Json,
                Environment::Development => LogFormat::Pretty,
            },
        };

        let backup_retain = lookup("FANTEA_BACKUP_RETAIN")
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_BACKUP_RETAIN);

        let max_upload_bytes = lookup("FANTEA_MAX_UPLOAD_BYTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let credentials_file = lookup("FANTEA_CREDENTIALS_FILE").map(PathBuf::from);

        Self {
            bind_addr,
            environment,
            data_dir,
            uploads_dir,
            cors_origins,
            log_level,
            log_format,
            backup_retain,
            max_upload_bytes,
            credentials_file,
        }
    }

    /// Where backups are written.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// The single-file document imported on first start.
    #[must_use]
    pub fn legacy_document(&self) -> PathBuf {
        self.data_dir.join(LEGACY_DOCUMENT_FILE)
    }
}

/// `<data_dir>/../uploads`, or `./uploads` when the data directory has no parent.
fn sibling_uploads_dir(data_dir: &Path) -> PathBuf {
    match data_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("uploads"),
        _ => PathBuf::from("./uploads"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.bind_addr, SocketAddr::from(([127, 0, 0, 1], 3001)));
        assert_eq!(c.environment, Environment::Development);
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.uploads_dir, PathBuf::from("./uploads"));
        assert_eq!(c.cors_origins, CorsOrigins::Any);
        assert_eq!(c.log_format, LogFormat::Pretty);
        assert_eq!(c.backup_retain, 10);
        assert_eq!(c.max_upload_bytes, 10 * 1024 * 1024);
        assert!(c.credentials_file.is_none());
        assert_eq!(c.legacy_document(), PathBuf::from("./data/cms-data.json"));
    }

    #[test]
    fn bind_addr_prefers_explicit_address_over_port() {
        assert_eq!(
            config(&[("PORT", "8080")]).bind_addr,
            SocketAddr::from(([0, 0, 0, 0], 8080))
        );
        assert_eq!(
            config(&[("PORT", "8080"), ("FANTEA_BIND_ADDR", "10.0.0.1:9000")]).bind_addr,
            SocketAddr::from(([10, 0, 0, 1], 9000))
        );
        assert_eq!(
            config(&[("FANTEA_BIND_ADDR", "garbage")]).bind_addr,
            SocketAddr::from(([127, 0, 0, 1], 3001))
        );
    }

    #[test]
    fn production_moves_the_data_dir() {
        let c = config(&[("NODE_ENV", "production")]);
        assert_eq!(c.environment, Environment::Production);
        assert_eq!(c.data_dir, PathBuf::from("/app/data"));

        let c = config(&[("NODE_ENV", "production"), ("FANTEA_DATA_DIR", "/srv/cms")]);
        assert_eq!(c.data_dir, PathBuf::from("/srv/cms"));
        assert_eq!(c.backup_dir(), PathBuf::from("/srv/cms/backups"));
        assert_eq!(c.uploads_dir, PathBuf::from("/srv/uploads"));
    }

    #[test]
    fn production_defaults() {
        let c = config(&[("FANTEA_ENV", "production")]);
        assert_eq!(c.uploads_dir, PathBuf::from("/app/uploads"));
        assert_eq!(c.cors_origins, CorsOrigins::List(Vec::new()));
        assert_eq!(c.log_format, LogFormat::Json);

        let c = config(&[
            ("FANTEA_ENV", "production"),
            ("FANTEA_CORS_ORIGINS", "*"),
            ("FANTEA_LOG_FORMAT", "pretty"),
            ("FANTEA_UPLOADS_DIR", "/var/www/uploads"),
        ]);
        assert_eq!(c.cors_origins, CorsOrigins::Any);
        assert_eq!(c.log_format, LogFormat::Pretty);
        assert_eq!(c.uploads_dir, PathBuf::from("/var/www/uploads"));
    }

    #[test]
    fn explicit_json_logging_in_development() {
        let c = config(&[("FANTEA_LOG_FORMAT", "json")]);
        assert_eq!(c.log_format, LogFormat::Json);
    }

    #[test]
    fn lists_and_numbers_parse() {
        let c = config(&[
            ("FANTEA_CORS_ORIGINS", "https://a.org, https://b.org,,"),
            ("FANTEA_BACKUP_RETAIN", "0"),
            ("FANTEA_MAX_UPLOAD_BYTES", "2048"),
            ("FANTEA_LOG_FORMAT", "pretty"),
        ]);
        assert_eq!(
            c.cors_origins,
            CorsOrigins::List(vec!["https://a.org".to_owned(), "https://b.org".to_owned()])
        );
        assert_eq!(c.backup_retain, 10);
        assert_eq!(c.max_upload_bytes, 2048);
        assert_eq!(c.log_format, LogFormat::Pretty);
    }
}
