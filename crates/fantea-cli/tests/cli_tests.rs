//! Integration tests for the `fantea` CLI binary.
//!
//! The CLI runs as a subprocess. Offline commands run against temp files;
//! the session and content commands run against an in-process content
//! service bound to an ephemeral port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;

use fantea_core::auth::{CredentialEntry, CredentialTable, Role};
use fantea_core::checksum::checksum;
use fantea_core::document::ContentDocument;
use fantea_server::build_router;
use fantea_server::config::{CorsOrigins, ServerConfig};
use fantea_server::state::AppState;

const PASSWORD: &str = "correct horse battery staple";

/// Helper: locate the `fantea` binary built by `cargo test`.
fn fantea_bin() -> String {
    let path = env!("CARGO_BIN_EXE_fantea");
    assert!(Path::new(path).exists(), "fantea binary not found at {path}");
    path.to_owned()
}

fn command(addr: &str, state_dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(fantea_bin());
    cmd.args(args)
        .env("FANTEA_ADDR", addr)
        .env("FANTEA_STATE_DIR", state_dir)
        .env_remove("FANTEA_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

fn output(mut cmd: Command) -> (i32, String, String) {
    let output = cmd.output().expect("failed to execute fantea");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

/// Helper: run fantea against a non-existent server.
fn run(state_dir: &Path, args: &[&str]) -> (i32, String, String) {
    output(command("http://127.0.0.1:19999", state_dir, args))
}

/// Helper: run fantea from async tests without blocking the server.
async fn run_async(addr: &str, state_dir: &Path, args: &[&str]) -> (i32, String, String) {
    let cmd = command(addr, state_dir, args);
    tokio::task::spawn_blocking(move || output(cmd)).await.unwrap()
}

/// Start a content service with an `admin` and a `viewer` account.
async fn start_server(dir: &TempDir) -> String {
    let table = CredentialTable {
        users: vec![
            CredentialEntry::create("admin", PASSWORD, Role::Admin),
            CredentialEntry::create("viewer", PASSWORD, Role::Viewer),
        ],
    };
    let creds = dir.path().join("credentials.json");
    fs::write(&creds, serde_json::to_string(&table).unwrap()).unwrap();

    let vars: HashMap<&str, String> = HashMap::from([
        ("FANTEA_DATA_DIR", dir.path().join("data").display().to_string()),
        ("FANTEA_UPLOADS_DIR", dir.path().join("uploads").display().to_string()),
        ("FANTEA_CREDENTIALS_FILE", creds.display().to_string()),
    ]);
    let config = ServerConfig::from_lookup(|key| vars.get(key).cloned());
    let state = AppState::build(&config).await.unwrap();
    let app = build_router(Arc::new(state), &CorsOrigins::Any);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn test_version_flag() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(dir.path(), &["--version"]);
    assert_eq!(code, 0, "fantea --version should exit 0");
    assert!(stdout.contains("fantea"), "version output should contain 'fantea': {stdout}");
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(dir.path(), &["--help"]);
    assert_eq!(code, 0);
    for cmd in ["status", "load", "save", "edit", "upload", "login", "watch", "backup", "verify"] {
        assert!(stdout.contains(cmd), "help should list '{cmd}': {stdout}");
    }
}

#[test]
fn test_subcommand_help() {
    let dir = tempfile::tempdir().unwrap();
    for sub in ["save", "edit", "upload", "login", "watch", "hash-password"] {
        let (code, stdout, _) = run(dir.path(), &[sub, "--help"]);
        assert_eq!(code, 0, "{sub} --help should exit 0");
        assert!(!stdout.is_empty(), "{sub} --help should produce output");
    }
}

#[test]
fn test_upload_help_describes_category() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(dir.path(), &["upload", "--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("instead of `images`"), "category help: {stdout}");
    assert!(stdout.contains("/uploads/<category>/<file>"), "category help: {stdout}");
    assert!(!stdout.contains("Subdirectory under"), "category help: {stdout}");
}

// ── Offline commands ─────────────────────────────────────────────────

#[test]
fn test_checksum_matches_library() {
    let dir = tempfile::tempdir().unwrap();
    let doc = json!({"hero": {"title": "Tea"}, "footer": {"copyright": "2025"}});
    let path = dir.path().join("doc.json");
    fs::write(&path, doc.to_string()).unwrap();

    let (code, stdout, _) = run(dir.path(), &["checksum", path.to_str().unwrap()]);
    assert_eq!(code, 0);
    let expected = checksum(&ContentDocument::from_value(doc).unwrap());
    assert_eq!(stdout.trim(), expected);
}

#[test]
fn test_verify_reports_sections_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cms-data-backup.json");
    let doc = json!({
        "hero": {"title": "T", "lastModified": "2025-01-01T00:00:00.000Z", "modifiedBy": "admin"},
        "footer": {"copyright": "2025"}
    });
    fs::write(&path, doc.to_string()).unwrap();

    let (code, stdout, _) = run(dir.path(), &["verify", path.to_str().unwrap()]);
    assert_eq!(code, 0, "verify should succeed: {stdout}");
    assert!(stdout.contains("footer"), "should name the section without metadata: {stdout}");
}

#[test]
fn test_verify_rejects_corrupt_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(&path, r#"{"hero": [1, 2]}"#).unwrap();

    let (code, _, stderr) = run(dir.path(), &["verify", path.to_str().unwrap()]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Error"), "should report an error: {stderr}");
}

#[test]
fn test_hash_password_output_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(
        dir.path(),
        &["hash-password", "maria", "--role", "admin", "--password", PASSWORD],
    );
    assert_eq!(code, 0);
    let entry: CredentialEntry = serde_json::from_str(&stdout).unwrap();
    assert_eq!(entry.role, Role::Admin);
    assert!(!stdout.contains(PASSWORD), "password must not be printed");

    let table = CredentialTable { users: vec![entry] };
    assert!(table.verify("maria", PASSWORD).is_ok());
    assert!(table.verify("maria", "nope").is_err());
}

#[test]
fn test_whoami_without_session() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(dir.path(), &["whoami"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("not logged in"));
}

#[test]
fn test_save_requires_login() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hero.json");
    fs::write(&path, r#"{"title": "x"}"#).unwrap();

    let (code, _, stderr) = run(dir.path(), &["save", "hero", path.to_str().unwrap()]);
    assert_ne!(code, 0);
    assert!(stderr.contains("not logged in"), "{stderr}");
}

#[test]
fn test_load_without_server_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run(dir.path(), &["load"]);
    assert_ne!(code, 0, "load without a server should fail");
    assert!(stderr.contains("request failed"), "{stderr}");
}

// ── Against a running service ────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_login_edit_load_and_watch() {
    let server_dir = tempfile::tempdir().unwrap();
    let addr = start_server(&server_dir).await;
    let state = tempfile::tempdir().unwrap();

    let (code, stdout, stderr) = run_async(
        &addr,
        state.path(),
        &["login", "admin", "--password", PASSWORD],
    )
    .await;
    assert_eq!(code, 0, "login failed: {stderr}");
    assert!(stdout.contains("Logged in as admin"));

    let (_, stdout, _) = run_async(&addr, state.path(), &["whoami"]).await;
    assert!(stdout.contains("admin"));
    assert!(stdout.contains("write"));

    let (code, stdout, stderr) = run_async(
        &addr,
        state.path(),
        &["edit", "hero", "--set", "title=Tea for all", "--set", "cta.text=Donate"],
    )
    .await;
    assert_eq!(code, 0, "edit failed: {stderr}");
    assert!(stdout.contains("revision 1"), "{stdout}");

    let (code, stdout, _) = run_async(&addr, state.path(), &["load", "hero"]).await;
    assert_eq!(code, 0);
    let hero: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hero["title"], "Tea for all");
    assert_eq!(hero["cta"]["text"], "Donate");
    assert_eq!(hero["modifiedBy"], "admin");

    // A fresh client sees the change and patches the page model.
    let watcher = tempfile::tempdir().unwrap();
    let (code, stdout, stderr) = run_async(&addr, watcher.path(), &["watch", "--once"]).await;
    assert_eq!(code, 0, "watch failed: {stderr}");
    assert!(stdout.contains("content changed"), "{stdout}");
    assert!(stdout.contains("#hero-title"), "{stdout}");
    assert!(stdout.contains("Tea for all"), "{stdout}");

    let (code, stdout, _) = run_async(&addr, state.path(), &["backup"]).await;
    assert_eq!(code, 0);
    assert!(stdout.contains("cms-data-"));

    let (_, stdout, _) = run_async(&addr, state.path(), &["logout"]).await;
    assert!(stdout.contains("Logged out"));
    let (_, stdout, _) = run_async(&addr, state.path(), &["whoami"]).await;
    assert!(stdout.contains("not logged in"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_revision_is_rejected() {
    let server_dir = tempfile::tempdir().unwrap();
    let addr = start_server(&server_dir).await;
    let state = tempfile::tempdir().unwrap();
    run_async(&addr, state.path(), &["login", "admin", "--password", PASSWORD]).await;

    let file = state.path().join("about.json");
    fs::write(&file, r#"{"title": "About us"}"#).unwrap();
    let file = file.to_str().unwrap();

    let (code, stdout, _) = run_async(&addr, state.path(), &["save", "about", file]).await;
    assert_eq!(code, 0);
    assert!(stdout.contains("revision 1"));

    let (code, _, stderr) = run_async(
        &addr,
        state.path(),
        &["save", "about", file, "--expected-revision", "0"],
    )
    .await;
    assert_ne!(code, 0);
    assert!(stderr.contains("409"), "{stderr}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_password_and_viewer_permissions() {
    let server_dir = tempfile::tempdir().unwrap();
    let addr = start_server(&server_dir).await;
    let state = tempfile::tempdir().unwrap();

    let (code, _, stderr) = run_async(&addr, state.path(), &["login", "admin", "--password", "wrong"]).await;
    assert_ne!(code, 0);
    assert!(stderr.contains("invalid username or password"), "{stderr}");

    let (code, _, _) = run_async(&addr, state.path(), &["login", "viewer", "--password", PASSWORD]).await;
    assert_eq!(code, 0);

    let (code, _, stderr) = run_async(&addr, state.path(), &["delete", "hero"]).await;
    assert_ne!(code, 0);
    assert!(stderr.contains("permission 'delete' denied"), "{stderr}");

    // Reads need no session at all.
    let (code, stdout, _) = run_async(&addr, state.path(), &["load"]).await;
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "{}");
}
