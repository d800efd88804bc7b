//! Publish/subscribe fan-out for show notifications.
//!
//! Delivery is synchronous: `publish` returns after every current subscriber
//! has seen the value, in subscription order. Each publish reaches each
//! subscriber at most once, and there is no replay, so a late subscriber
//! only sees what is published after it joined.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

type Callback<T> = Box<dyn Fn(&T) + Send>;

struct Subscribers<T> {
    next_id: u64,
    list: Vec<(u64, Callback<T>)>,
}

/// Cloneable handle to one logical channel. Clones share subscribers.
pub struct NotificationBus<T> {
    inner: Arc<Mutex<Subscribers<T>>>,
}

/// Returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl<T> NotificationBus<T> {
    pub fn new() -> Self {
        NotificationBus {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 1,
                list: Vec::new(),
            })),
        }
    }

    /// Register a callback. Callbacks must not subscribe or publish on the
    /// same bus from inside the callback.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + 'static,
    {
        let mut subs = self.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.list.push((id, Box::new(f)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.list.len();
        subs.list.retain(|(sid, _)| *sid != id.0);
        subs.list.len() != before
    }

    pub fn publish(&self, value: T) {
        let subs = self.lock();
        for (_, f) in subs.list.iter() {
            f(&value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().list.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers<T>> {
        // A panicking subscriber poisons the lock; keep delivering to the rest.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Clone for NotificationBus<T> {
    fn clone(&self) -> Self {
        NotificationBus {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for NotificationBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle notifications for presentation layers (title cards, status lines).
#[derive(Debug, Clone, PartialEq)]
pub enum ShowEvent {
    SegmentLoaded {
        name: String,
        title: String,
        lines: usize,
    },
    SegmentFailed {
        path: PathBuf,
        reason: String,
    },
    /// A segment started playing; fired once per segment.
    Title(String),
    SegmentFinished {
        name: String,
    },
    Paused(bool),
    /// Playback was stopped from outside; queued lines and segments were dropped.
    Stopped,
    /// Every pending segment has been played or has failed.
    Completed,
}
