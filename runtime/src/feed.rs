//! The Change Feed.
//!
//! Every write accepted by the service is published as a [`ChangeEvent`]
//! carrying the fully hydrated aggregate. Observers subscribe by
//! [`FeedKey`]:
//!
//! - `Request(id)`: a patient or provider tracking one request
//! - `AllUnclaimed`: idle providers watching the open pool
//! - `All`: admin dashboards
//!
//! # Architecture
//!
//! ```text
//! CareService ── publish(event) ──> ChangeFeed
//!                                     │ keys(event) = {Request(id), All, AllUnclaimed?}
//!                                     ├──> broadcast::Sender[Request(id)] ──> Subscription
//!                                     ├──> broadcast::Sender[All]         ──> Subscription
//!                                     └──> broadcast::Sender[AllUnclaimed]──> Subscription
//! ```
//!
//! Channels exist only while someone is subscribed: [`ChangeFeed::subscribe`]
//! creates the key's channel on demand and [`Subscription::close`] (or drop)
//! removes it once the last subscriber for that key is gone.
//!
//! # Ordering
//!
//! Events for one request are published in write order, but a subscriber
//! must not rely on delivery order alone: every event carries the request's
//! write [`Version`] and observers keep the highest one ([`LastWriteWins`]).
//! A subscriber that falls behind skips to the newest retained events; since
//! each event is the full state, its view converges.
//!
//! # Access
//!
//! A request-keyed subscription can carry its viewer
//! ([`Subscription::for_viewer`]). Each event is checked against the
//! viewer's read access before delivery; the first event the viewer may no
//! longer read revokes the subscription instead of being delivered.

use curare_core::ids::{CareRequestId, Version};
use curare_core::lifecycle::LifecycleEngine;
use curare_core::principal::Principal;
use curare_core::types::CareRequest;
use futures::Stream;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Default number of events buffered per key before slow subscribers lag.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// What a subscriber is interested in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "key", content = "request_id", rename_all = "snake_case")]
pub enum FeedKey {
    /// One request.
    Request(CareRequestId),
    /// Requests entering or leaving the unclaimed pool.
    AllUnclaimed,
    /// Every request.
    All,
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(id) => write!(f, "request:{id}"),
            Self::AllUnclaimed => f.write_str("all_unclaimed"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Kind of write that produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The request was submitted.
    Created,
    /// A transition was applied.
    Updated,
}

/// A published change: the full post-write state of one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Created or updated.
    pub kind: ChangeKind,
    /// Write sequence of `request`, for last-write-wins.
    pub version: Version,
    /// Whether the request was unclaimed before this write.
    pub was_unclaimed: bool,
    /// The hydrated aggregate after the write.
    pub request: Arc<CareRequest>,
}

impl ChangeEvent {
    /// Event for a newly submitted request.
    #[must_use]
    pub fn created(request: CareRequest) -> Self {
        Self {
            kind: ChangeKind::Created,
            version: request.version,
            was_unclaimed: false,
            request: Arc::new(request),
        }
    }

    /// Event for an accepted transition.
    #[must_use]
    pub fn updated(request: CareRequest, was_unclaimed: bool) -> Self {
        Self {
            kind: ChangeKind::Updated,
            version: request.version,
            was_unclaimed,
            request: Arc::new(request),
        }
    }

    /// Keys whose subscribers receive this event.
    ///
    /// `AllUnclaimed` observers hear about a request both when it enters and
    /// when it leaves the unclaimed pool.
    #[must_use]
    pub fn keys(&self) -> SmallVec<[FeedKey; 3]> {
        let mut keys = smallvec![FeedKey::Request(self.request.id), FeedKey::All];
        if self.was_unclaimed || self.request.is_unclaimed() {
            keys.push(FeedKey::AllUnclaimed);
        }
        keys
    }
}

type ChannelsMap = Arc<RwLock<HashMap<FeedKey, broadcast::Sender<ChangeEvent>>>>;

/// Fan-out of accepted writes to keyed subscribers.
///
/// Clones share the same channels. The feed is an explicit value owned by
/// the service; there is no process-wide registry.
#[derive(Clone)]
pub struct ChangeFeed {
    channels: ChannelsMap,
    capacity: usize,
}

impl ChangeFeed {
    /// Create a feed with the default per-key capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a feed buffering `capacity` events per key.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Publish an event to every matching key. Returns the number of
    /// subscribers it was delivered to.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        for key in event.keys() {
            if let Some(sender) = channels.get(&key) {
                // Err only means every receiver went away between lookups.
                delivered += sender.send(event.clone()).unwrap_or(0);
            }
        }
        drop(channels);

        metrics::counter!("care_feed_events_published_total").increment(1);
        tracing::debug!(
            request_id = %event.request.id,
            version = %event.version,
            delivered,
            "Published change event"
        );
        delivered
    }

    /// Subscribe to a key.
    ///
    /// The returned handle owns the subscription; close it (or drop it) to
    /// release server-side resources.
    #[must_use]
    pub fn subscribe(&self, key: FeedKey) -> Subscription {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let receiver = channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        let active = channels.len();
        drop(channels);

        record_active_channels(active);
        tracing::debug!(%key, "Subscribed to change feed");
        Subscription {
            key,
            receiver: Some(receiver),
            feed: self.clone(),
            viewer: None,
            revoked: false,
        }
    }

    /// Number of keys with at least one open subscription.
    #[must_use]
    pub fn active_channels(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of open subscriptions for `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: FeedKey) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop the key's channel if nobody listens any more.
    fn release(&self, key: FeedKey) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if let Entry::Occupied(entry) = channels.entry(key) {
            if entry.get().receiver_count() == 0 {
                entry.remove();
            }
        }
        let active = channels.len();
        drop(channels);
        record_active_channels(active);
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("active_channels", &self.active_channels())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[allow(clippy::cast_precision_loss)] // Channel counts are far below 2^52
fn record_active_channels(active: usize) {
    metrics::gauge!("care_feed_active_channels").set(active as f64);
}

/// An open subscription to one [`FeedKey`].
///
/// Closing is idempotent and also happens on drop.
#[derive(Debug)]
pub struct Subscription {
    key: FeedKey,
    receiver: Option<broadcast::Receiver<ChangeEvent>>,
    feed: ChangeFeed,
    viewer: Option<Principal>,
    revoked: bool,
}

impl Subscription {
    /// The subscribed key.
    #[must_use]
    pub const fn key(&self) -> FeedKey {
        self.key
    }

    /// Check every event against `viewer`'s read access.
    #[must_use]
    pub fn for_viewer(mut self, viewer: Principal) -> Self {
        self.viewer = Some(viewer);
        self
    }

    /// Whether the viewer lost access and the subscription was closed.
    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Wait for the next event. Returns `None` once closed or revoked.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => return self.admit(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Slow consumer; newer full-state events follow.
                    tracing::warn!(
                        key = %self.key,
                        skipped,
                        "Change feed subscriber lagged, {} events skipped",
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    /// Return an event if one is already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(event) => return self.admit(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Release the subscription. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            drop(receiver);
            self.feed.release(self.key);
            tracing::debug!(key = %self.key, "Closed change feed subscription");
        }
    }

    /// Pass `event` through the viewer check, revoking on failure.
    fn admit(&mut self, event: ChangeEvent) -> Option<ChangeEvent> {
        let Some(viewer) = self.viewer else {
            return Some(event);
        };
        if LifecycleEngine::authorize_view(&event.request, &viewer).is_ok() {
            return Some(event);
        }
        tracing::info!(
            key = %self.key,
            role = %viewer.role,
            version = %event.version,
            "Viewer lost access, revoking change feed subscription"
        );
        self.revoked = true;
        self.close();
        None
    }

    /// Turn the subscription into a stream that ends when it is closed.
    pub fn into_stream(mut self) -> impl Stream<Item = ChangeEvent> + Send {
        async_stream::stream! {
            while let Some(event) = self.recv().await {
                yield event;
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Client-side view that applies events by version, not arrival order.
///
/// # Example
///
/// ```
/// use curare_runtime::feed::LastWriteWins;
///
/// let view = LastWriteWins::new();
/// assert!(view.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct LastWriteWins {
    latest: HashMap<CareRequestId, Arc<CareRequest>>,
}

impl LastWriteWins {
    /// Create an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event; returns `false` when it is older than what is held.
    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        match self.latest.entry(event.request.id) {
            Entry::Occupied(mut held) if held.get().version < event.version => {
                held.insert(Arc::clone(&event.request));
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&event.request));
                true
            }
        }
    }

    /// Current state of a request.
    #[must_use]
    pub fn get(&self, id: CareRequestId) -> Option<&CareRequest> {
        self.latest.get(&id).map(AsRef::as_ref)
    }

    /// Number of requests held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
