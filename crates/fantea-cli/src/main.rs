//! `fantea` CLI: command-line client for the Fantea content service.
//!
//! Talks to the service over its JSON API. Sessions and the content cache
//! live in a local state directory so they survive between invocations.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod client;

use std::io::BufRead as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use fantea_core::auth::{
    AuthService, AuthState, CredentialEntry, KeeperConfig, Permission, Role, Session, SessionKeeper,
};
use fantea_core::binding::BindingTable;
use fantea_core::broadcast::{BroadcastHub, EventTransport, SharedKeyTransport};
use fantea_core::cache::ClientCache;
use fantea_core::checksum::checksum;
use fantea_core::document::ContentDocument;
use fantea_core::dom::{MemoryDom, NodeId};
use fantea_core::editor::{AdminEditor, FormState, SaveOutcome, SectionSchema};
use fantea_core::patcher::Patcher;
use fantea_core::source::ContentSource;
use fantea_core::store::{SaveRequest, verify_backup};
use fantea_core::sync::{SyncConfig, SyncEngine, SyncOutcome};
use fantea_core::upload::UploadRequest;
use fantea_storage::FileBackend;

use crate::client::Client;

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

/// How often `watch` checks the shared update key for other watchers' changes.
const SHARED_KEY_POLL: Duration = Duration::from_millis(500);

// ── CLI definition ───────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "fantea",
    version,
    about = "Fantea CLI: edit, sync and back up the Fantea site content",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         FANTEA_ADDR        Content service address (default: http://127.0.0.1:3001)\n  \
         FANTEA_STATE_DIR   Local session and cache directory (default: .fantea)\n  \
         FANTEA_PASSWORD    Password for login / hash-password (default: read stdin)\n\n\
         {DIM}Examples:{RESET}\n  \
         fantea status\n  \
         fantea login admin --remember\n  \
         fantea edit hero --set title='Tea for all'\n  \
         fantea watch --page index"
    ),
)]
struct Cli {
    /// Content service address.
    #[arg(long, env = "FANTEA_ADDR", default_value = "http://127.0.0.1:3001")]
    addr: String,

    /// Directory for the local session and content cache.
    #[arg(long, env = "FANTEA_STATE_DIR", default_value = ".fantea")]
    state_dir: PathBuf,

    /// Request timeout in seconds.
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Log sync and session activity to stderr.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show service health and the local session.
    Status,

    /// Print the whole document, or one section.
    Load {
        /// Section name.
        section: Option<String>,
    },

    /// Replace a section with the JSON object in a file.
    Save {
        /// Section name.
        section: String,
        /// Path to a JSON object.
        file: PathBuf,
        /// Record this name as the editor instead of the session user.
        #[arg(long)]
        user: Option<String>,
        /// Fail unless the section is still at this revision.
        #[arg(long)]
        expected_revision: Option<u64>,
    },

    /// Edit a section through its admin form.
    Edit {
        /// Section name (hero, about, programs, impact, team, contact, footer).
        section: String,
        /// Set a form field, e.g. `--set cta.text=Donate`.
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        sets: Vec<String>,
        /// Replace a repeat block with these items, fields separated by `|`,
        /// e.g. `--item stats='500+|Families'`.
        #[arg(long = "item", value_name = "BLOCK=V1|V2|...")]
        items: Vec<String>,
        /// Store as a local preview instead of saving.
        #[arg(long)]
        preview: bool,
    },

    /// Print a section's form fields and current values.
    Form {
        /// Section name.
        section: String,
    },

    /// Delete a section.
    Delete {
        /// Section name.
        section: String,
    },

    /// Upload an image file.
    Upload {
        /// Path to a PNG, JPEG, GIF, WebP or SVG file.
        file: PathBuf,
        /// Upload directory to use instead of `images`; the URL becomes
        /// `/uploads/<category>/<file>`.
        #[arg(long)]
        category: Option<String>,
        /// Stored file name (default: the local file name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Log in as an admin user.
    Login {
        /// Username.
        username: String,
        /// Keep the session in persistent storage.
        #[arg(long)]
        remember: bool,
        /// Password (default: read one line from stdin).
        #[arg(long, env = "FANTEA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Drop the local session.
    Logout,

    /// Show the logged-in user.
    Whoami,

    /// Extend the current session by another 24 hours.
    Renew,

    /// Poll the service and patch a page model on every change.
    Watch {
        /// Page whose bindings to patch.
        #[arg(long, default_value = "index")]
        page: String,
        /// Poll interval in seconds.
        #[arg(long, default_value = "5")]
        interval: u64,
        /// Poll once and exit.
        #[arg(long)]
        once: bool,
    },

    /// Write a server-side backup of the whole document.
    Backup,

    /// List server-side backups, newest first.
    Backups,

    /// Check a backup file and print its checksum.
    Verify {
        /// Path to a backup file.
        file: PathBuf,
    },

    /// Print the content checksum of a document file.
    Checksum {
        /// Path to a JSON document.
        file: PathBuf,
    },

    /// Print a credential entry for the service's credentials file.
    HashPassword {
        /// Username.
        username: String,
        /// Role to grant.
        #[arg(long, value_enum, default_value = "editor")]
        role: RoleArg,
        /// Password (default: read one line from stdin).
        #[arg(long, env = "FANTEA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Admin,
    Editor,
    Viewer,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Admin => Self::Admin,
            RoleArg::Editor => Self::Editor,
            RoleArg::Viewer => Self::Viewer,
        }
    }
}

// ── Output helpers ───────────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<20}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to format JSON: {e}"),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

// ── Local state ──────────────────────────────────────────────────────

/// Session-scoped and persistent stores under the state directory.
struct LocalState {
    local: ClientCache,
    session: ClientCache,
}

impl LocalState {
    fn open(dir: &Path) -> Result<Self> {
        let open = |name: &str| -> Result<ClientCache> {
            let path = dir.join(name);
            let backend = FileBackend::open(&path)
                .with_context(|| format!("failed to open state directory {}", path.display()))?
                .with_extension("json");
            Ok(ClientCache::new(Arc::new(backend)))
        };
        Ok(Self {
            local: open("local")?,
            session: open("session")?,
        })
    }
}

struct App {
    client: Arc<Client>,
    state: LocalState,
    auth: Arc<AuthService>,
}

impl App {
    fn new(client: Client, state_dir: &Path) -> Result<Self> {
        let client = Arc::new(client);
        let state = LocalState::open(state_dir)?;
        let auth = Arc::new(AuthService::new(
            client.clone(),
            state.local.clone(),
            state.session.clone(),
        ));
        Ok(Self { client, state, auth })
    }

    async fn require(&self, permission: Permission) -> Result<Session> {
        let session = self.auth.require(permission, Utc::now()).await?;
        self.auth.record_activity(Utc::now());
        Ok(session)
    }
}

fn read_password(arg: Option<String>) -> Result<String> {
    if let Some(password) = arg {
        return Ok(password);
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_owned();
    if password.is_empty() {
        bail!("no password given: pass --password, set FANTEA_PASSWORD or pipe it on stdin");
    }
    Ok(password)
}

/// Encode an image file as a data URL, typed by extension.
fn image_data_url(path: &Path, bytes: &[u8]) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        other => bail!("unsupported image type '.{other}'"),
    };
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

fn read_json_file(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn split_assignment(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{raw}'"))
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose { "fantea_core=debug,info" } else { "error" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        addr,
        state_dir,
        timeout,
        command,
        ..
    } = cli;
    let connect = || -> Result<App> {
        let client = Client::new(&addr, Duration::from_secs(timeout))?;
        App::new(client, &state_dir)
    };

    match command {
        Command::Verify { file } => cmd_verify(&file).await,
        Command::Checksum { file } => cmd_checksum(&file),
        Command::HashPassword {
            username,
            role,
            password,
        } => cmd_hash_password(&username, role.into(), password),
        Command::Status => cmd_status(&connect()?).await,
        Command::Load { section } => cmd_load(&connect()?, section.as_deref()).await,
        Command::Save {
            section,
            file,
            user,
            expected_revision,
        } => cmd_save(&connect()?, section, &file, user, expected_revision).await,
        Command::Edit {
            section,
            sets,
            items,
            preview,
        } => cmd_edit(&connect()?, &section, &sets, &items, preview).await,
        Command::Form { section } => cmd_form(&connect()?, &section).await,
        Command::Delete { section } => cmd_delete(&connect()?, &section).await,
        Command::Upload {
            file,
            category,
            name,
        } => cmd_upload(&connect()?, &file, category, name).await,
        Command::Login {
            username,
            remember,
            password,
        } => cmd_login(&connect()?, &username, remember, password).await,
        Command::Logout => cmd_logout(&connect()?).await,
        Command::Whoami => cmd_whoami(&connect()?).await,
        Command::Renew => cmd_renew(&connect()?).await,
        Command::Watch {
            page,
            interval,
            once,
        } => cmd_watch(&connect()?, &page, interval, once).await,
        Command::Backup => cmd_backup(&connect()?).await,
        Command::Backups => cmd_backups(&connect()?).await,
    }
}

// ── Content commands ─────────────────────────────────────────────────

async fn cmd_status(ctx: &App) -> Result<()> {
    let health = ctx.client.get("/api/health").await?;
    header("◉", "Fantea Status");
    kv_line("Address", ctx.client.addr());
    kv_line(
        "Service",
        health.get("status").and_then(Value::as_str).unwrap_or("unknown"),
    );
    kv_line(
        "Sections",
        &health.get("sections").and_then(Value::as_u64).unwrap_or(0).to_string(),
    );
    match ctx.auth.state(Utc::now()).await? {
        AuthState::Authenticated(s) => kv_line("Session", &format!("{} ({:?})", s.username, s.role)),
        AuthState::Expired { username, .. } => kv_line("Session", &format!("{username} (expired)")),
        AuthState::Anonymous | AuthState::LoggedOut => kv_line("Session", "none"),
    }
    if let Some(sum) = ctx.state.local.content_checksum().await? {
        kv_line("Cached checksum", &sum);
    }
    println!();
    Ok(())
}

async fn cmd_load(ctx: &App, section: Option<&str>) -> Result<()> {
    let path = match section {
        Some(s) => format!("/api/cms/load/{s}"),
        None => "/api/cms/load".to_owned(),
    };
    let resp = ctx.client.get(&path).await?;
    print_json(resp.get("data").unwrap_or(&Value::Null));
    Ok(())
}

async fn cmd_save(
    ctx: &App,
    section: String,
    file: &Path,
    user: Option<String>,
    expected_revision: Option<u64>,
) -> Result<()> {
    let session = ctx.require(Permission::Write).await?;
    let data = read_json_file(file)?;
    let saved = ctx
        .client
        .save_section(SaveRequest {
            section,
            data,
            user: user.unwrap_or(session.username),
            expected_revision,
        })
        .await?;
    success(&format!(
        "Section '{}' saved (revision {}, {})",
        saved.section,
        saved.revision,
        timestamp(saved.last_modified)
    ));
    Ok(())
}

fn editor(ctx: &App) -> AdminEditor {
    AdminEditor::new(
        ctx.client.clone(),
        ctx.state.local.clone(),
        SectionSchema::site_default(),
    )
}

async fn cmd_edit(ctx: &App, section: &str, sets: &[String], items: &[String], preview: bool) -> Result<()> {
    let session = ctx.require(Permission::Write).await?;
    let editor = editor(ctx);
    let schema = editor.schema(section)?;

    let document = ctx.client.fetch_document().await?;
    let mut form = editor.form_for(section, &document)?;

    for raw in sets {
        let (name, value) = split_assignment(raw)?;
        if !schema.fields.iter().any(|f| f.name == name) {
            bail!("section '{section}' has no field '{name}'");
        }
        form.values.insert(name.to_owned(), value.to_owned());
    }

    apply_items(&mut form, schema, items)?;

    if preview {
        let data = editor.preview(section, &form).await?;
        header("◎", &format!("Preview: {section}"));
        print_json(&data);
        return Ok(());
    }

    match editor.save(section, &form, &session.username).await? {
        SaveOutcome::Saved(saved) => success(&format!(
            "Section '{}' saved (revision {})",
            saved.section, saved.revision
        )),
        SaveOutcome::LocalOnly { error } => {
            warning(&format!("Saved locally only: {error}"));
        }
    }
    Ok(())
}

/// Replace each named block with the given `|`-separated items.
fn apply_items(form: &mut FormState, schema: &SectionSchema, items: &[String]) -> Result<()> {
    let mut replaced: Vec<&str> = Vec::new();
    for raw in items {
        let (name, values) = split_assignment(raw)?;
        let block = schema
            .blocks
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| anyhow!("section '{}' has no repeat block '{name}'", schema.section))?;

        let mut inputs: Vec<String> = values.split('|').map(str::to_owned).collect();
        if inputs.len() > block.fields.len() {
            bail!(
                "block '{name}' takes {} fields, got {}",
                block.fields.len(),
                inputs.len()
            );
        }
        inputs.resize(block.fields.len(), String::new());

        let entry = form.blocks.entry(name.to_owned()).or_default();
        if !replaced.contains(&name) {
            entry.clear();
            replaced.push(name);
        }
        entry.push(inputs);
    }
    Ok(())
}

async fn cmd_form(ctx: &App, section: &str) -> Result<()> {
    let editor = editor(ctx);
    let schema = editor.schema(section)?;
    let document = ctx.client.fetch_document().await?;
    let form = editor.form_for(section, &document)?;

    header("✎", &format!("Form: {section}"));
    for f in &schema.fields {
        let value = form.values.get(&f.name).map_or("", String::as_str);
        kv_line(&format!("{} ({:?})", f.name, f.kind), value);
    }
    for block in &schema.blocks {
        let names: Vec<&str> = block.fields.iter().map(|f| f.name.as_str()).collect();
        println!();
        println!("  {BOLD}{}{RESET} {DIM}[{}]{RESET}", block.name, names.join(" | "));
        for (i, item) in form.blocks.get(&block.name).into_iter().flatten().enumerate() {
            println!("    {DIM}{i:>2}{RESET} {}", item.join(" | "));
        }
    }
    println!();
    Ok(())
}

async fn cmd_delete(ctx: &App, section: &str) -> Result<()> {
    ctx.require(Permission::Delete).await?;
    let resp = ctx.client.delete(&format!("/api/cms/section/{section}")).await?;
    if resp.get("deleted").and_then(Value::as_bool).unwrap_or(false) {
        success(&format!("Section '{section}' deleted"));
    } else {
        warning(&format!("Section '{section}' did not exist"));
    }
    Ok(())
}

async fn cmd_upload(ctx: &App, file: &Path, category: Option<String>, name: Option<String>) -> Result<()> {
    ctx.require(Permission::Upload).await?;
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let image_data = image_data_url(file, &bytes)?;
    let filename = match name {
        Some(n) => n,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("{} has no file name", file.display()))?,
    };

    let url = ctx
        .client
        .upload_image(UploadRequest {
            image_data,
            filename,
            category,
        })
        .await?;
    success(&format!("Uploaded {url}"));
    Ok(())
}

async fn cmd_backup(ctx: &App) -> Result<()> {
    ctx.require(Permission::Backup).await?;
    let resp = ctx.client.post_no_body("/api/cms/backup").await?;
    let file = resp.get("file").and_then(Value::as_str).unwrap_or("?");
    success(&format!("Backup written: {file}"));
    Ok(())
}

async fn cmd_backups(ctx: &App) -> Result<()> {
    let resp = ctx.client.get("/api/cms/backups").await?;
    let files = resp.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
    header("▤", "Backups");
    if files.is_empty() {
        println!("  {DIM}(none){RESET}");
    }
    for f in files {
        println!("  {}", f.as_str().unwrap_or_default());
    }
    println!();
    Ok(())
}

// ── Offline commands ─────────────────────────────────────────────────

async fn cmd_verify(file: &Path) -> Result<()> {
    let report = verify_backup(file).await?;
    header("✓", "Backup");
    kv_line("File", &file.display().to_string());
    kv_line("Sections", &report.sections.to_string());
    kv_line("Checksum", &report.checksum);
    if report.missing_metadata.is_empty() {
        success("All sections carry metadata");
    } else {
        warning(&format!(
            "Sections without metadata: {}",
            report.missing_metadata.join(", ")
        ));
    }
    Ok(())
}

fn cmd_checksum(file: &Path) -> Result<()> {
    let document = ContentDocument::from_value(read_json_file(file)?)?;
    println!("{}", checksum(&document));
    Ok(())
}

fn cmd_hash_password(username: &str, role: Role, password: Option<String>) -> Result<()> {
    let password = read_password(password)?;
    let entry = CredentialEntry::create(username, &password, role);
    print_json(&serde_json::to_value(&entry).context("failed to encode credential entry")?);
    Ok(())
}

// ── Session commands ─────────────────────────────────────────────────

async fn cmd_login(ctx: &App, username: &str, remember: bool, password: Option<String>) -> Result<()> {
    let password = read_password(password)?;
    let session = ctx.auth.login(username, &password, remember, Utc::now()).await?;
    success(&format!(
        "Logged in as {} ({:?}), valid until {}",
        session.username,
        session.role,
        timestamp(session.expires_at())
    ));
    Ok(())
}

async fn cmd_logout(ctx: &App) -> Result<()> {
    ctx.auth.logout().await?;
    success("Logged out");
    Ok(())
}

async fn cmd_whoami(ctx: &App) -> Result<()> {
    match ctx.auth.state(Utc::now()).await? {
        AuthState::Authenticated(session) => print_session(&session),
        AuthState::Expired { username, expired_at } => warning(&format!(
            "Session for {username} expired at {}",
            timestamp(expired_at)
        )),
        AuthState::Anonymous | AuthState::LoggedOut => println!("not logged in"),
    }
    Ok(())
}

async fn cmd_renew(ctx: &App) -> Result<()> {
    let session = ctx.auth.renew(Utc::now()).await?;
    success(&format!("Session renewed until {}", timestamp(session.expires_at())));
    Ok(())
}

fn print_session(session: &Session) {
    header("◉", "Session");
    kv_line("User", &session.username);
    kv_line("Role", &format!("{:?}", session.role));
    let permissions: Vec<&str> = session.permissions.iter().map(|p| p.as_str()).collect();
    kv_line("Permissions", &permissions.join(", "));
    kv_line("Logged in", &timestamp(session.login_time));
    kv_line("Expires", &timestamp(session.expires_at()));
    kv_line("Remembered", if session.persistent { "yes" } else { "no" });
    println!();
}

// ── Watch ────────────────────────────────────────────────────────────

type PageModel = Arc<Mutex<MemoryDom>>;

fn print_page(dom: &PageModel, nodes: &[(String, NodeId)]) {
    let dom = dom.lock().unwrap_or_else(PoisonError::into_inner);
    for (selector, node) in nodes {
        let shown = [dom.text(*node), dom.html(*node), dom.attribute(*node, "src"), dom.attribute(*node, "href")]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or("-");
        kv_line(selector, shown);
    }
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Unchanged => println!("  {DIM}unchanged{RESET}"),
        SyncOutcome::Changed {
            checksum,
            sections,
            patch,
        } => {
            let (applied, missing) = patch.as_ref().map_or((0, 0), |p| (p.applied, p.missing));
            success(&format!(
                "content changed: checksum {checksum}, {sections} sections, {applied} bindings applied, {missing} missing"
            ));
        }
    }
}

async fn cmd_watch(ctx: &App, page: &str, interval: u64, once: bool) -> Result<()> {
    let table = BindingTable::site_default();
    let patcher = Patcher::for_page(&table, page).ok_or_else(|| {
        let known: Vec<&str> = table.page_names().collect();
        anyhow!("unknown page '{page}' (known: {})", known.join(", "))
    })?;

    let mut model = MemoryDom::new();
    let nodes: Vec<(String, NodeId)> = patcher
        .selectors()
        .into_iter()
        .map(|s| {
            let node = model.add(&[s.as_str()]);
            (s, node)
        })
        .collect();
    let model: PageModel = Arc::new(Mutex::new(model));

    let events = Arc::new(EventTransport::new());
    let shared = SharedKeyTransport::new(ctx.state.local.clone());
    let hub = BroadcastHub::new(format!("fantea-cli-{}", std::process::id()))
        .with_transport(events.clone())
        .with_transport(Arc::new(shared.clone()));
    // Other watchers sharing the state directory publish through the same key.
    let (inbox_tx, inbox_rx) = tokio::sync::broadcast::channel(16);

    let config = SyncConfig {
        poll_interval: Duration::from_secs(interval.max(1)),
        ..SyncConfig::default()
    };
    let engine = Arc::new(
        SyncEngine::new(ctx.client.clone(), ctx.state.local.clone(), Arc::new(hub), config)
            .with_view(patcher, model.clone())
            .with_inbox(inbox_rx),
    );

    header("↻", &format!("Watching page '{page}' at {}", ctx.client.addr()));
    if engine.init().await {
        println!("  {DIM}hydrated from local cache{RESET}");
        print_page(&model, &nodes);
    }

    if once {
        let outcome = engine.tick().await?;
        print_outcome(&outcome);
        if outcome.is_changed() {
            print_page(&model, &nodes);
        }
        return Ok(());
    }

    {
        let model = model.clone();
        let nodes = nodes.clone();
        let auth = ctx.auth.clone();
        events.listen(move |message| {
            auth.record_activity(Utc::now());
            success(&format!(
                "content changed: checksum {}, {} sections",
                message.checksum,
                message.document.len()
            ));
            print_page(&model, &nodes);
        });
    }

    let keeper = match ctx.auth.current(Utc::now()).await? {
        Some(_) => Some(SessionKeeper::spawn(ctx.auth.clone(), KeeperConfig::default())),
        None => None,
    };
    let watcher = shared.watch(SHARED_KEY_POLL, inbox_tx);
    let handle = engine.spawn();

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    println!();
    watcher.stop().await;
    handle.dispose().await;
    if let Some(keeper) = keeper {
        keeper.dispose().await;
    }
    success("Stopped watching");
    Ok(())
}
