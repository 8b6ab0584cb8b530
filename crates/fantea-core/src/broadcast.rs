//! Best-effort fan-out of content changes to other clients.
//!
//! A [`BroadcastHub`] publishes each [`SyncMessage`] through every registered
//! [`Transport`]. No transport is authoritative: delivery failures are logged
//! and counted, never returned as errors, and a receiver may see the same
//! document through several transports. Receivers de-duplicate by checksum.
//!
//! Transports provided here:
//!
//! - [`ChannelTransport`]: named in-process broadcast channel
//! - [`SharedKeyTransport`]: writes the message to a shared cache key; other
//!   processes sharing the cache pick it up with [`SharedKeyTransport::watch`]
//! - [`EventTransport`]: synchronous in-process listener callbacks

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::ClientCache;
use crate::document::ContentDocument;
use crate::error::TransportError;

/// Cache key written by [`SharedKeyTransport`].
pub const UPDATE_KEY: &str = "fantea_cms_update";

/// A content change as seen by one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Identifier of the publishing client.
    pub origin: String,
    /// Checksum of `document`.
    pub checksum: String,
    /// The full document.
    pub document: ContentDocument,
}

/// A pluggable delivery mechanism.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Deliver a message.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`]; the hub logs it and moves on.
    async fn publish(&self, message: &SyncMessage) -> Result<(), TransportError>;
}

/// Outcome counts of one hub publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Transports that accepted the message.
    pub delivered: usize,
    /// Transports that failed or had nobody listening.
    pub failed: usize,
}

/// Publishes to every registered transport.
pub struct BroadcastHub {
    origin: String,
    transports: Vec<Arc<dyn Transport>>,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("origin", &self.origin)
            .field(
                "transports",
                &self.transports.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl BroadcastHub {
    /// A hub with no transports, publishing as `origin`.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            transports: Vec::new(),
        }
    }

    /// Register a transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// This client's origin identifier.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Number of registered transports.
    #[must_use]
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    /// Build a message for `document` stamped with this hub's origin.
    #[must_use]
    pub fn message(&self, document: ContentDocument, checksum: String) -> SyncMessage {
        SyncMessage {
            origin: self.origin.clone(),
            checksum,
            document,
        }
    }

    /// Publish through every transport.
    pub async fn publish(&self, message: &SyncMessage) -> Delivery {
        let mut delivery = Delivery::default();
        for transport in &self.transports {
            match transport.publish(message).await {
                Ok(()) => delivery.delivered = delivery.delivered.saturating_add(1),
                Err(TransportError::NoReceivers { name }) => {
                    debug!(transport = %name, "no receivers for content update");
                    delivery.failed = delivery.failed.saturating_add(1);
                }
                Err(e) => {
                    warn!(transport = transport.name(), error = %e, "content broadcast failed");
                    delivery.failed = delivery.failed.saturating_add(1);
                }
            }
        }
        debug!(
            checksum = %message.checksum,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "content update broadcast"
        );
        delivery
    }
}

/// A named in-process broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    name: String,
    sender: broadcast::Sender<SyncMessage>,
}

impl ChannelTransport {
    /// Create a channel buffering up to `capacity` messages per receiver.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
        }
    }

    /// Subscribe a new receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.sender.subscribe()
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: &SyncMessage) -> Result<(), TransportError> {
        self.sender
            .send(message.clone())
            .map(|_| ())
            .map_err(|_| TransportError::NoReceivers {
                name: self.name.clone(),
            })
    }
}

/// Writes each message to a shared cache key.
#[derive(Debug, Clone)]
pub struct SharedKeyTransport {
    cache: ClientCache,
    key: String,
}

impl SharedKeyTransport {
    /// Publish to [`UPDATE_KEY`] in `cache`.
    #[must_use]
    pub fn new(cache: ClientCache) -> Self {
        Self {
            cache,
            key: UPDATE_KEY.to_owned(),
        }
    }

    /// The most recent message written to the shared key.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Failed`] if the cache backend fails.
    pub async fn latest(&self) -> Result<Option<SyncMessage>, TransportError> {
        self.cache
            .read_json(&self.key)
            .await
            .map_err(|e| TransportError::Failed {
                name: "shared-key".to_owned(),
                reason: e.to_string(),
            })
    }

    /// Poll the shared key every `interval` and forward each new message
    /// to `inbox`, typically the sender half of a sync engine's inbox.
    ///
    /// Whatever the key holds when watching starts counts as already seen.
    #[must_use]
    pub fn watch(&self, interval: Duration, inbox: broadcast::Sender<SyncMessage>) -> KeyWatcher {
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let transport = self.clone();
        let task = tokio::spawn(async move {
            let mut seen = transport.latest().await.ok().flatten().map(|m| fingerprint(&m));
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
                let message = match transport.latest().await {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "failed to read shared content update");
                        continue;
                    }
                };
                let current = fingerprint(&message);
                if seen.as_ref() == Some(&current) {
                    continue;
                }
                seen = Some(current);
                debug!(origin = %message.origin, checksum = %message.checksum, "shared content update");
                if inbox.send(message).is_err() {
                    debug!("shared key watcher has no receivers, stopping");
                    break;
                }
            }
        });
        KeyWatcher {
            shutdown: shutdown_tx,
            task,
        }
    }
}

fn fingerprint(message: &SyncMessage) -> (String, String) {
    (message.origin.clone(), message.checksum.clone())
}

/// Background poller started by [`SharedKeyTransport::watch`].
#[derive(Debug)]
pub struct KeyWatcher {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl KeyWatcher {
    /// Whether the poller has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[async_trait::async_trait]
impl Transport for SharedKeyTransport {
    fn name(&self) -> &'static str {
        "shared-key"
    }

    async fn publish(&self, message: &SyncMessage) -> Result<(), TransportError> {
        self.cache
            .write_json(&self.key, message)
            .await
            .map_err(|e| TransportError::Failed {
                name: self.name().to_owned(),
                reason: e.to_string(),
            })
    }
}

type Listener = Arc<dyn Fn(&SyncMessage) + Send + Sync>;

/// Synchronous in-process listeners, called in registration order.
#[derive(Default)]
pub struct EventTransport {
    listeners: RwLock<Vec<Listener>>,
}

impl std::fmt::Debug for EventTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTransport").finish_non_exhaustive()
    }
}

impl EventTransport {
    /// No listeners yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn listen(&self, listener: impl Fn(&SyncMessage) + Send + Sync + 'static) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        listeners.push(Arc::new(listener));
    }
}

#[async_trait::async_trait]
impl Transport for EventTransport {
    fn name(&self) -> &'static str {
        "event"
    }

    async fn publish(&self, message: &SyncMessage) -> Result<(), TransportError> {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return Err(TransportError::NoReceivers {
                name: self.name().to_owned(),
            });
        }
        for listener in listeners {
            listener(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use fantea_storage::MemoryBackend;
    use serde_json::json;

    fn message(hub: &BroadcastHub) -> SyncMessage {
        let doc = ContentDocument::from_value(json!({"hero": {"title": "X"}})).unwrap();
        hub.message(doc, "abc".to_owned())
    }

    #[tokio::test]
    async fn every_transport_receives_the_message() {
        let channel = Arc::new(ChannelTransport::new("fantea-cms", 8));
        let mut rx = channel.subscribe();
        let cache = ClientCache::new(Arc::new(MemoryBackend::new()));
        let shared = Arc::new(SharedKeyTransport::new(cache));
        let events = Arc::new(EventTransport::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        events.listen(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let hub = BroadcastHub::new("tab-1")
            .with_transport(channel.clone())
            .with_transport(shared.clone())
            .with_transport(events.clone());
        let msg = message(&hub);
        let delivery = hub.publish(&msg).await;

        assert_eq!(delivery, Delivery { delivered: 3, failed: 0 });
        assert_eq!(rx.recv().await.unwrap(), msg);
        assert_eq!(shared.latest().await.unwrap(), Some(msg));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_receivers_are_counted_not_fatal() {
        let hub = BroadcastHub::new("tab-1")
            .with_transport(Arc::new(ChannelTransport::new("fantea-cms", 8)))
            .with_transport(Arc::new(EventTransport::new()));
        let delivery = hub.publish(&message(&hub)).await;
        assert_eq!(delivery, Delivery { delivered: 0, failed: 2 });
    }
}
