//! Admin sessions.
//!
//! A session moves `Anonymous → Authenticated → Expired | LoggedOut`. It is
//! valid while `now - loginTime <= 24h`; expiry is detected lazily whenever
//! the state is read, and [`AuthService::renew`] slides the window forward.
//! "Remember me" sessions go to the persistent `local` cache, others to the
//! `session` cache.
//!
//! Credentials are checked by a pluggable [`Authenticator`]. The built-in
//! [`CredentialTable`] holds salted SHA-256 hashes loaded from configuration
//! and compares them in constant time. Plaintext passwords are never stored.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{ClientCache, SESSION_KEY};
use crate::error::AuthError;

/// Hours a session stays valid after login or renewal.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Session lifetime.
#[must_use]
pub fn session_ttl() -> TimeDelta {
    TimeDelta::hours(SESSION_TTL_HOURS)
}

/// A flat permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read content.
    Read,
    /// Save sections.
    Write,
    /// Delete sections.
    Delete,
    /// Upload images.
    Upload,
    /// Create backups.
    Backup,
    /// Manage admin users.
    ManageUsers,
}

impl Permission {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Upload => "upload",
            Self::Backup => "backup",
            Self::ManageUsers => "manage_users",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Everything.
    Admin,
    /// Content editing.
    Editor,
    /// Read-only.
    Viewer,
}

impl Role {
    /// Fixed permissions of the role.
    #[must_use]
    pub fn permissions(self) -> Vec<Permission> {
        use Permission::{Backup, Delete, ManageUsers, Read, Upload, Write};
        match self {
            Self::Admin => vec![Read, Write, Delete, Upload, Backup, ManageUsers],
            Self::Editor => vec![Read, Write, Upload],
            Self::Viewer => vec![Read],
        }
    }
}

/// A verified user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Username.
    pub username: String,
    /// Role.
    pub role: Role,
}

/// A logged-in admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Username.
    pub username: String,
    /// Role.
    pub role: Role,
    /// Permissions granted by the role at login.
    pub permissions: Vec<Permission>,
    /// Login or last renewal time.
    pub login_time: DateTime<Utc>,
    /// Random session identifier.
    pub session_id: String,
    /// Whether the session survives restarts ("remember me").
    pub persistent: bool,
}

impl Session {
    /// A fresh session for `identity`.
    #[must_use]
    pub fn start(identity: Identity, persistent: bool, now: DateTime<Utc>) -> Self {
        Self {
            permissions: identity.role.permissions(),
            username: identity.username,
            role: identity.role,
            login_time: now,
            session_id: uuid::Uuid::new_v4().to_string(),
            persistent,
        }
    }

    /// When the session stops being valid.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.login_time + session_ttl()
    }

    /// Whether the session is valid at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.login_time) <= session_ttl()
    }

    /// Whether the session grants `permission`.
    #[must_use]
    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// Where a session stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Nobody has logged in.
    Anonymous,
    /// A valid session.
    Authenticated(Session),
    /// The stored session ran out and has been cleared.
    Expired {
        /// Who was logged in.
        username: String,
        /// When the session ended.
        expired_at: DateTime<Utc>,
    },
    /// The user logged out through this service.
    LoggedOut,
}

/// Verifies credentials.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    /// Check a username/password pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] on mismatch and
    /// [`AuthError::Backend`] if verification could not run.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, AuthError>;
}

/// One configured admin user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialEntry {
    /// Username.
    pub username: String,
    /// Per-user salt.
    pub salt: String,
    /// Hex SHA-256 of `salt || password`.
    pub password_sha256: String,
    /// Role.
    pub role: Role,
}

impl CredentialEntry {
    /// Hash `password` under a fresh random salt.
    #[must_use]
    pub fn create(username: &str, password: &str, role: Role) -> Self {
        let salt = uuid::Uuid::new_v4().simple().to_string();
        Self {
            username: username.to_owned(),
            password_sha256: hash_password(&salt, password),
            salt,
            role,
        }
    }

    fn matches(&self, password: &str) -> bool {
        let candidate = hash_password(&self.salt, password);
        candidate
            .as_bytes()
            .ct_eq(self.password_sha256.to_ascii_lowercase().as_bytes())
            .into()
    }
}

/// Hex SHA-256 of `salt || password`.
#[must_use]
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Salted-hash credential store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialTable {
    /// Configured users.
    pub users: Vec<CredentialEntry>,
}

impl CredentialTable {
    /// Parse a table from JSON (`{"users": [...]}`).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentialTable`] for malformed JSON,
    /// duplicate usernames or hashes that are not 64 hex digits.
    pub fn from_json(text: &str) -> Result<Self, AuthError> {
        let table: Self =
            serde_json::from_str(text).map_err(|e| AuthError::InvalidCredentialTable {
                reason: e.to_string(),
            })?;

        let mut seen = std::collections::HashSet::new();
        for user in &table.users {
            if !seen.insert(user.username.as_str()) {
                return Err(AuthError::InvalidCredentialTable {
                    reason: format!("duplicate user '{}'", user.username),
                });
            }
            if user.password_sha256.len() != 64
                || !user.password_sha256.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return Err(AuthError::InvalidCredentialTable {
                    reason: format!("user '{}' has a malformed password hash", user.username),
                });
            }
        }
        Ok(table)
    }

    /// Load a table from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentialTable`] if the file cannot be
    /// read or parsed.
    pub async fn load(path: &Path) -> Result<Self, AuthError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AuthError::InvalidCredentialTable {
                reason: format!("{}: {e}", path.display()),
            })?;
        Self::from_json(&text)
    }

    /// Number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Check a username/password pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] on any mismatch.
    pub fn verify(&self, username: &str, password: &str) -> Result<Identity, AuthError> {
        let entry = self.users.iter().find(|u| u.username == username);
        // Hash even for unknown users so both paths cost the same.
        let matched = match entry {
            Some(entry) => entry.matches(password),
            None => {
                let _ = hash_password("", password);
                false
            }
        };
        match entry {
            Some(entry) if matched => Ok(Identity {
                username: entry.username.clone(),
                role: entry.role,
            }),
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for CredentialTable {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Identity, AuthError> {
        self.verify(username, password)
    }
}

/// Session state machine over the two client caches.
pub struct AuthService {
    authenticator: Arc<dyn Authenticator>,
    local: ClientCache,
    session: ClientCache,
    logged_out: AtomicBool,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService").finish_non_exhaustive()
    }
}

impl AuthService {
    /// A service storing persistent sessions in `local` and others in
    /// `session`.
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>, local: ClientCache, session: ClientCache) -> Self {
        Self {
            authenticator,
            local,
            session,
            logged_out: AtomicBool::new(false),
            last_activity: Mutex::new(None),
        }
    }

    /// Verify credentials and store a new session.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`] on mismatch.
    /// - [`AuthError::Backend`] if the authenticator is unreachable.
    /// - [`AuthError::Storage`] if the session cannot be stored.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        remember: bool,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let identity = match self.authenticator.authenticate(username, password).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(username, error = %e, "login failed");
                return Err(e);
            }
        };

        let session = Session::start(identity, remember, now);
        self.clear().await?;
        self.store_for(&session).write_json(SESSION_KEY, &session).await?;
        self.logged_out.store(false, Ordering::SeqCst);
        self.record_activity(now);

        info!(
            username = %session.username,
            role = ?session.role,
            persistent = remember,
            "admin logged in"
        );
        Ok(session)
    }

    /// Current state, clearing the stored session if it has expired.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the caches fail.
    pub async fn state(&self, now: DateTime<Utc>) -> Result<AuthState, AuthError> {
        let Some(session) = self.stored().await? else {
            return Ok(if self.logged_out.load(Ordering::SeqCst) {
                AuthState::LoggedOut
            } else {
                AuthState::Anonymous
            });
        };

        if session.is_valid_at(now) {
            return Ok(AuthState::Authenticated(session));
        }

        let expired_at = session.expires_at();
        self.clear().await?;
        info!(username = %session.username, %expired_at, "admin session expired");
        Ok(AuthState::Expired {
            username: session.username,
            expired_at,
        })
    }

    /// The valid session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the caches fail.
    pub async fn current(&self, now: DateTime<Utc>) -> Result<Option<Session>, AuthError> {
        Ok(match self.state(now).await? {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        })
    }

    /// Whether a valid session grants `permission`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the caches fail.
    pub async fn has_permission(&self, permission: Permission, now: DateTime<Utc>) -> Result<bool, AuthError> {
        Ok(self.current(now).await?.is_some_and(|s| s.has(permission)))
    }

    /// The session, provided it grants `permission`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] without a session.
    /// - [`AuthError::Expired`] if it just expired.
    /// - [`AuthError::Forbidden`] if the role lacks the permission.
    pub async fn require(&self, permission: Permission, now: DateTime<Utc>) -> Result<Session, AuthError> {
        match self.state(now).await? {
            AuthState::Authenticated(session) if session.has(permission) => Ok(session),
            AuthState::Authenticated(session) => Err(AuthError::Forbidden {
                username: session.username,
                permission: permission.to_string(),
            }),
            AuthState::Expired { expired_at, .. } => Err(AuthError::Expired {
                expired_at: expired_at.to_rfc3339(),
            }),
            AuthState::Anonymous | AuthState::LoggedOut => Err(AuthError::NotAuthenticated),
        }
    }

    /// Slide the validity window to start at `now`.
    ///
    /// # Errors
    ///
    /// Same as [`AuthService::require`] without the permission check.
    pub async fn renew(&self, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let mut session = match self.state(now).await? {
            AuthState::Authenticated(session) => session,
            AuthState::Expired { expired_at, .. } => {
                return Err(AuthError::Expired {
                    expired_at: expired_at.to_rfc3339(),
                });
            }
            AuthState::Anonymous | AuthState::LoggedOut => return Err(AuthError::NotAuthenticated),
        };
        session.login_time = now;
        self.store_for(&session).write_json(SESSION_KEY, &session).await?;
        debug!(username = %session.username, "admin session renewed");
        Ok(session)
    }

    /// Clear both caches.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the caches fail.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let username = self.stored().await?.map(|s| s.username);
        self.clear().await?;
        self.logged_out.store(true, Ordering::SeqCst);
        info!(username = username.as_deref().unwrap_or("-"), "admin logged out");
        Ok(())
    }

    /// Note user activity for the heartbeat.
    pub fn record_activity(&self, now: DateTime<Utc>) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
    }

    /// Last recorded activity.
    #[must_use]
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check expiry and renew if there was activity within `idle_threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the caches fail.
    pub async fn heartbeat(&self, now: DateTime<Utc>, idle_threshold: TimeDelta) -> Result<AuthState, AuthError> {
        let state = self.state(now).await?;
        let active = self
            .last_activity()
            .is_some_and(|at| now.signed_duration_since(at) <= idle_threshold);
        match state {
            AuthState::Authenticated(_) if active => Ok(AuthState::Authenticated(self.renew(now).await?)),
            other => Ok(other),
        }
    }

    async fn stored(&self) -> Result<Option<Session>, AuthError> {
        if let Some(session) = self.session.read_json(SESSION_KEY).await? {
            return Ok(Some(session));
        }
        Ok(self.local.read_json(SESSION_KEY).await?)
    }

    async fn clear(&self) -> Result<(), AuthError> {
        self.session.remove(SESSION_KEY).await?;
        self.local.remove(SESSION_KEY).await?;
        Ok(())
    }

    fn store_for(&self, session: &Session) -> &ClientCache {
        if session.persistent { &self.local } else { &self.session }
    }
}

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeeperConfig {
    /// Delay between heartbeats.
    pub interval: Duration,
    /// Activity newer than this renews the session.
    pub idle_threshold: TimeDelta,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            idle_threshold: TimeDelta::minutes(30),
        }
    }
}

/// Background heartbeat that expires and renews the session.
#[derive(Debug)]
pub struct SessionKeeper {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionKeeper {
    /// Start the heartbeat. The first beat runs after one interval.
    #[must_use]
    pub fn spawn(auth: Arc<AuthService>, config: KeeperConfig) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match auth.heartbeat(Utc::now(), config.idle_threshold).await {
                            Ok(AuthState::Expired { username, .. }) => {
                                info!(%username, "session keeper observed expiry");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "session heartbeat failed"),
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
            debug!("session keeper stopped");
        });
        Self { shutdown, task }
    }

    /// Stop the heartbeat and wait for it to exit.
    pub async fn dispose(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "session keeper ended abnormally");
        }
    }
}
