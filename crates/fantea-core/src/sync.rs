//! Client-side content sync.
//!
//! A [`SyncEngine`] polls its [`ContentSource`], compares the document's
//! checksum with the last one it saw, and on change caches the document,
//! patches the page and broadcasts the update. An unchanged document causes
//! no writes at all. Documents received from other clients go through
//! [`SyncEngine::apply_remote`] under the same rule.
//!
//! Lifecycle: build the engine, call [`SyncEngine::init`] to hydrate from the
//! local cache, then [`SyncEngine::spawn`] the poll loop and keep the
//! returned [`SyncHandle`] until [`SyncHandle::dispose`].

use std::future::pending;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broadcast::{BroadcastHub, SyncMessage};
use crate::cache::ClientCache;
use crate::checksum::checksum;
use crate::document::ContentDocument;
use crate::dom::Dom;
use crate::error::SourceError;
use crate::patcher::{PatchReport, Patcher};
use crate::source::ContentSource;

/// Consecutive failed polls before logging at error level.
const PERSISTENT_FAILURE_THRESHOLD: u32 = 5;

/// Poll timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Delay between successful polls.
    pub poll_interval: Duration,
    /// Retries after a transient fetch failure.
    pub max_retries: u32,
    /// First retry delay; doubles on each attempt.
    pub retry_base: Duration,
    /// Delay between polls once retries are exhausted, until a fetch succeeds.
    pub fallback_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_retries: 3,
            retry_base: Duration::from_secs(1),
            fallback_interval: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

/// Result of applying a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Same checksum as before; nothing was written.
    Unchanged,
    /// The document changed and was cached, patched and (for polls)
    /// broadcast.
    Changed {
        /// Checksum of the new document.
        checksum: String,
        /// Number of sections in it.
        sections: usize,
        /// Patch counts, if the engine drives a page.
        patch: Option<PatchReport>,
    },
}

impl SyncOutcome {
    /// Whether the document changed.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

struct PageView {
    patcher: Patcher,
    dom: Arc<Mutex<dyn Dom>>,
}

#[derive(Default)]
struct SyncState {
    checksum: Option<String>,
    document: Option<ContentDocument>,
}

/// Keeps one client's copy of the content document current.
pub struct SyncEngine {
    source: Arc<dyn ContentSource>,
    cache: ClientCache,
    hub: Arc<BroadcastHub>,
    view: Option<PageView>,
    config: SyncConfig,
    state: tokio::sync::Mutex<SyncState>,
    inbox: Mutex<Option<broadcast::Receiver<SyncMessage>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("origin", &self.hub.origin())
            .field("page", &self.view.as_ref().map(|v| v.patcher.page()))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// An engine that caches and broadcasts but drives no page.
    #[must_use]
    pub fn new(
        source: Arc<dyn ContentSource>,
        cache: ClientCache,
        hub: Arc<BroadcastHub>,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            cache,
            hub,
            view: None,
            config,
            state: tokio::sync::Mutex::new(SyncState::default()),
            inbox: Mutex::new(None),
        }
    }

    /// Patch `dom` through `patcher` on every change.
    #[must_use]
    pub fn with_view(mut self, patcher: Patcher, dom: Arc<Mutex<dyn Dom>>) -> Self {
        self.view = Some(PageView { patcher, dom });
        self
    }

    /// Apply messages from another client's channel while running.
    #[must_use]
    pub fn with_inbox(self, inbox: broadcast::Receiver<SyncMessage>) -> Self {
        *self.inbox.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbox);
        self
    }

    /// Poll timing in effect.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The last document seen.
    pub async fn current(&self) -> Option<ContentDocument> {
        self.state.lock().await.document.clone()
    }

    /// Checksum of the last document seen.
    pub async fn checksum(&self) -> Option<String> {
        self.state.lock().await.checksum.clone()
    }

    /// Hydrate from the local cache and patch the page with it.
    ///
    /// Returns `true` if a cached document was found. Cache failures are
    /// logged and treated as an empty cache.
    pub async fn init(&self) -> bool {
        let document = match self.cache.content().await {
            Ok(Some(document)) => document,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "content cache unreadable, starting empty");
                return false;
            }
        };
        let sum = match self.cache.content_checksum().await {
            Ok(Some(sum)) => sum,
            _ => checksum(&document),
        };

        let mut state = self.state.lock().await;
        let report = self.patch(&document);
        info!(
            checksum = %sum,
            sections = document.len(),
            applied = report.map_or(0, |r| r.applied),
            "hydrated from content cache"
        );
        state.checksum = Some(sum);
        state.document = Some(document);
        true
    }

    /// Fetch once and apply the result.
    ///
    /// # Errors
    ///
    /// Returns the [`SourceError`] from the fetch.
    pub async fn tick(&self) -> Result<SyncOutcome, SourceError> {
        let document = self.source.fetch_document().await?;
        Ok(self.apply(document, true).await)
    }

    /// Apply a document published by another client.
    ///
    /// Messages from this engine's own origin are ignored. Remote documents
    /// are never re-broadcast.
    pub async fn apply_remote(&self, message: &SyncMessage) -> SyncOutcome {
        if message.origin == self.hub.origin() {
            return SyncOutcome::Unchanged;
        }
        debug!(origin = %message.origin, checksum = %message.checksum, "remote content update");
        self.apply(message.document.clone(), false).await
    }

    async fn apply(&self, document: ContentDocument, publish: bool) -> SyncOutcome {
        let sum = checksum(&document);
        let mut state = self.state.lock().await;
        if state.checksum.as_deref() == Some(sum.as_str()) {
            return SyncOutcome::Unchanged;
        }

        if let Err(e) = self.cache.store_content(&document, &sum).await {
            warn!(error = %e, "failed to cache content document");
        }
        let patch = self.patch(&document);
        let sections = document.len();

        state.checksum = Some(sum.clone());
        state.document = Some(document.clone());
        drop(state);

        if publish {
            let message = self.hub.message(document, sum.clone());
            self.hub.publish(&message).await;
        }

        info!(checksum = %sum, sections, "content updated");
        SyncOutcome::Changed {
            checksum: sum,
            sections,
            patch,
        }
    }

    fn patch(&self, document: &ContentDocument) -> Option<PatchReport> {
        let view = self.view.as_ref()?;
        let mut dom = view.dom.lock().unwrap_or_else(PoisonError::into_inner);
        Some(view.patcher.patch_document(&mut *dom, document))
    }

    /// Tick with exponential backoff on transient failures. Returns:
    /// - `Ok(Some(outcome))` on success
    /// - `Ok(None)` if shutdown was signalled while waiting
    /// - `Err(last_error)` if retries ran out or the error is permanent
    async fn tick_with_retry(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<SyncOutcome>, SourceError> {
        let mut attempt: u32 = 0;
        loop {
            match self.tick().await {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(e) if !e.is_transient() || attempt >= self.config.max_retries => return Err(e),
                Err(e) => {
                    let backoff = self.config.backoff(attempt);
                    attempt = attempt.saturating_add(1);
                    debug!(
                        attempt,
                        max = self.config.max_retries,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "content fetch failed, retrying"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => return Ok(None),
                    }
                }
            }
        }
    }

    /// Start the poll loop. The first poll runs immediately.
    #[must_use]
    pub fn spawn(self: &Arc<Self>) -> SyncHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move { engine.run(shutdown_rx, inbox).await });
        SyncHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
        mut inbox: Option<broadcast::Receiver<SyncMessage>>,
    ) {
        let next_poll = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(next_poll);
        let mut consecutive_failures: u32 = 0;
        info!(
            origin = %self.hub.origin(),
            poll_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "content sync started"
        );

        loop {
            tokio::select! {
                () = &mut next_poll => {
                    let delay = match self.tick_with_retry(&mut shutdown).await {
                        Ok(None) => break,
                        Ok(Some(_)) => {
                            consecutive_failures = 0;
                            self.config.poll_interval
                        }
                        Err(e) => {
                            consecutive_failures = consecutive_failures.saturating_add(1);
                            if consecutive_failures >= PERSISTENT_FAILURE_THRESHOLD {
                                error!(error = %e, consecutive_failures, "content service persistently unreachable");
                            } else {
                                warn!(
                                    error = %e,
                                    consecutive_failures,
                                    retries = self.config.max_retries,
                                    "content fetch failed after retries, switching to fallback interval"
                                );
                            }
                            self.config.fallback_interval
                        }
                    };
                    next_poll.as_mut().reset(Instant::now() + delay);
                }
                received = next_message(&mut inbox) => match received {
                    Ok(message) => {
                        self.apply_remote(&message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "sync inbox lagged, next poll will catch up");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("sync inbox closed");
                        inbox = None;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!(origin = %self.hub.origin(), "content sync stopped");
    }
}

async fn next_message(
    inbox: &mut Option<broadcast::Receiver<SyncMessage>>,
) -> Result<SyncMessage, broadcast::error::RecvError> {
    match inbox {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

/// Running poll loop. Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn dispose(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "content sync task ended abnormally");
        }
    }
}
