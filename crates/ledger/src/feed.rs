//! Change feed.
//!
//! Subscribers register a [`FeedFilter`] and receive [`FeedEvent`]s over a
//! bounded channel. A new (or resyncing) subscription first gets one
//! [`FeedEvent::Snapshot`] of its filtered view; events published while that
//! snapshot is being read are buffered and flushed right after it, so the
//! baseline is never missed. Delivery is at-least-once: an event that raced
//! the snapshot read may show up both inside the snapshot and after it.
//!
//! Publishing never waits. A subscriber whose channel (or snapshot buffer) is
//! full is dropped and its stream ends.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    AggregateUpdate, FeedFilter, LedgerError, MonthlyAggregate, ResultLedger, Transaction,
    WalletBalance,
};

pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Full current state of a subscription's filtered view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// Newest first.
    pub transactions: Vec<Transaction>,
    pub aggregates: Vec<MonthlyAggregate>,
    pub wallet: WalletBalance,
    /// Stored records that could not be decoded.
    pub skipped: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum FeedEvent {
    Snapshot(FeedSnapshot),
    TransactionAdded(Transaction),
    TransactionRemoved(Transaction),
    AggregateUpdated(AggregateUpdate),
}

impl FeedEvent {
    fn is_visible_to(&self, filter: &FeedFilter) -> bool {
        match self {
            Self::Snapshot(_) => false,
            Self::TransactionAdded(tx) | Self::TransactionRemoved(tx) => {
                filter.matches(&tx.user_id, tx.year())
            }
            Self::AggregateUpdated(update) => {
                filter.matches(&update.monthly.user_id, update.monthly.year)
            }
        }
    }
}

/// Identifies one subscription for [`ChangeFeed::unsubscribe`] and resyncs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

enum Delivery {
    /// Waiting for a snapshot; incremental events queue up here.
    Syncing(Vec<FeedEvent>),
    Live,
}

struct Subscriber {
    filter: FeedFilter,
    sender: mpsc::Sender<FeedEvent>,
    delivery: Delivery,
    active: Arc<AtomicBool>,
}

impl Subscriber {
    /// Returns `false` when the subscriber can no longer keep up.
    fn offer(&mut self, event: FeedEvent, capacity: usize) -> bool {
        match &mut self.delivery {
            Delivery::Syncing(pending) => {
                if pending.len() >= capacity {
                    return false;
                }
                pending.push(event);
                true
            }
            Delivery::Live => self.sender.try_send(event).is_ok(),
        }
    }

    fn go_live(&mut self, snapshot: FeedSnapshot) -> bool {
        let pending = match std::mem::replace(&mut self.delivery, Delivery::Live) {
            Delivery::Syncing(pending) => pending,
            Delivery::Live => Vec::new(),
        };
        std::iter::once(FeedEvent::Snapshot(snapshot))
            .chain(pending)
            .all(|event| self.sender.try_send(event).is_ok())
    }
}

struct FeedInner {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionHandle, Subscriber>>,
}

impl FeedInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriptionHandle, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, handle: SubscriptionHandle) -> bool {
        match self.subscribers().remove(&handle) {
            Some(subscriber) => {
                subscriber.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// Fan-out point between ledger mutations and subscribers.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ChangeFeed {
    /// `capacity` bounds both the per-subscriber channel and the events
    /// buffered while a snapshot is pending.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }

    /// Registers a subscriber in syncing state. Nothing is delivered until
    /// [`deliver_snapshot`](Self::deliver_snapshot) is called for it.
    pub fn register(&self, filter: FeedFilter) -> Subscription {
        let handle = SubscriptionHandle(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        // One extra slot so a full buffer can still be flushed behind the snapshot.
        let (sender, receiver) = mpsc::channel(self.inner.capacity + 1);
        let active = Arc::new(AtomicBool::new(true));

        tracing::debug!(subscription = handle.0, user = %filter.user_id, year = ?filter.year, "feed subscriber registered");
        self.inner.subscribers().insert(
            handle,
            Subscriber {
                filter,
                sender,
                delivery: Delivery::Syncing(Vec::new()),
                active: Arc::clone(&active),
            },
        );

        Subscription {
            handle,
            receiver,
            active,
            feed: Arc::downgrade(&self.inner),
        }
    }

    /// Puts a live subscription back into syncing state ahead of a fresh
    /// snapshot.
    pub fn begin_resync(&self, handle: SubscriptionHandle) -> ResultLedger<FeedFilter> {
        let mut subscribers = self.inner.subscribers();
        let subscriber = subscribers
            .get_mut(&handle)
            .ok_or(LedgerError::SubscriptionClosed)?;
        if matches!(subscriber.delivery, Delivery::Live) {
            subscriber.delivery = Delivery::Syncing(Vec::new());
        }
        Ok(subscriber.filter.clone())
    }

    /// Sends the snapshot, then everything buffered since registration, and
    /// switches the subscription to incremental delivery.
    pub fn deliver_snapshot(
        &self,
        handle: SubscriptionHandle,
        snapshot: FeedSnapshot,
    ) -> ResultLedger<()> {
        let mut subscribers = self.inner.subscribers();
        let subscriber = subscribers
            .get_mut(&handle)
            .ok_or(LedgerError::SubscriptionClosed)?;
        if subscriber.go_live(snapshot) {
            return Ok(());
        }

        tracing::warn!(subscription = handle.0, "feed subscriber overflowed during snapshot, dropping");
        if let Some(subscriber) = subscribers.remove(&handle) {
            subscriber.active.store(false, Ordering::SeqCst);
        }
        Err(LedgerError::SubscriptionClosed)
    }

    /// Offers `event` to every matching subscriber without waiting.
    pub fn publish(&self, event: &FeedEvent) {
        let capacity = self.inner.capacity;
        self.inner.subscribers().retain(|handle, subscriber| {
            if !event.is_visible_to(&subscriber.filter) {
                return true;
            }
            if subscriber.offer(event.clone(), capacity) {
                return true;
            }
            if subscriber.sender.is_closed() {
                tracing::debug!(subscription = handle.0, "feed subscriber went away");
            } else {
                tracing::warn!(subscription = handle.0, "feed subscriber overflowed, dropping");
            }
            subscriber.active.store(false, Ordering::SeqCst);
            false
        });
    }

    /// Stops delivery to `handle`. Returns whether it was still subscribed;
    /// calling it again is harmless.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.inner.remove(handle)
    }
}

/// Receiving end of a subscription.
///
/// Ends (`None`) once unsubscribed, dropped for overflow, or when the feed is
/// gone. Dropping it unsubscribes.
pub struct Subscription {
    handle: SubscriptionHandle,
    receiver: mpsc::Receiver<FeedEvent>,
    active: Arc<AtomicBool>,
    feed: Weak<FeedInner>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn recv(&mut self) -> Option<FeedEvent> {
        if !self.is_active() {
            return None;
        }
        let event = self.receiver.recv().await?;
        self.is_active().then_some(event)
    }

    /// Non-blocking receive: `Ok(None)` when nothing is queued right now.
    pub fn try_recv(&mut self) -> ResultLedger<Option<FeedEvent>> {
        if !self.is_active() {
            return Err(LedgerError::SubscriptionClosed);
        }
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(LedgerError::SubscriptionClosed),
        }
    }
}

impl Stream for Subscription {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.is_active() {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) if self.is_active() => Poll::Ready(Some(event)),
            Poll::Ready(_) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.feed.upgrade() {
            inner.remove(self.handle);
        }
    }
}
