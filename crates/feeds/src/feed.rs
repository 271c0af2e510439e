//! Change-feed abstraction (whole-snapshot deliveries per collection).
//!
//! A feed delivers the **complete** current listing of a collection on every
//! change, never a diff. Errors arrive out of band in the same delivery type.
//! Retrying a broken subscription is the feed's own business.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use materialflow_core::AccountId;

use crate::collection::Collection;
use crate::document::{FeedError, RawDocument, SnapshotEvent};
use crate::listener::{Listener, ListenerRegistry, Subscription};

/// Subscription source for account-scoped collections.
///
/// Implementations may invoke the listener from any thread.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(
        &self,
        account: &AccountId,
        collection: Collection,
        listener: Listener<SnapshotEvent>,
    ) -> Subscription;
}

impl<F> ChangeFeed for Arc<F>
where
    F: ChangeFeed + ?Sized,
{
    fn subscribe(
        &self,
        account: &AccountId,
        collection: Collection,
        listener: Listener<SnapshotEvent>,
    ) -> Subscription {
        (**self).subscribe(account, collection, listener)
    }
}

type FeedKey = (AccountId, Collection);

/// In-memory change feed for tests/dev.
///
/// Keeps the latest snapshot per (account, collection) and replays it to new
/// subscribers immediately, like a live query listener would.
#[derive(Debug)]
pub struct InMemoryChangeFeed {
    listeners: Arc<ListenerRegistry<FeedKey, SnapshotEvent>>,
    snapshots: Mutex<HashMap<FeedKey, Vec<RawDocument>>>,
}

impl InMemoryChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored collection and deliver it to current subscribers.
    pub fn publish_snapshot(
        &self,
        account: &AccountId,
        collection: Collection,
        documents: Vec<RawDocument>,
    ) -> usize {
        let key = (account.clone(), collection);
        // Held across dispatch so a concurrent subscribe never replays an older listing.
        let mut snapshots = match self.snapshots.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        snapshots.insert(key.clone(), documents.clone());
        self.dispatch(&key, SnapshotEvent::snapshot(documents))
    }

    /// Deliver an error without touching the stored snapshot.
    pub fn publish_error(&self, account: &AccountId, collection: Collection, error: FeedError) -> usize {
        let key = (account.clone(), collection);
        self.dispatch(&key, SnapshotEvent::failed(error))
    }

    /// Number of live subscribers for one (account, collection).
    pub fn subscriber_count(&self, account: &AccountId, collection: Collection) -> usize {
        self.listeners.count(&(account.clone(), collection))
    }

    fn dispatch(&self, key: &FeedKey, event: SnapshotEvent) -> usize {
        match self.listeners.dispatch(key, event) {
            Ok(n) => n,
            Err(err) => {
                warn!(collection = %key.1, error = %err, "in-memory feed dispatch failed");
                0
            }
        }
    }
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self {
            listeners: ListenerRegistry::new(),
            snapshots: Mutex::new(HashMap::new()),
        }
    }
}

impl ChangeFeed for InMemoryChangeFeed {
    fn subscribe(
        &self,
        account: &AccountId,
        collection: Collection,
        listener: Listener<SnapshotEvent>,
    ) -> Subscription {
        let key = (account.clone(), collection);
        let snapshots = match self.snapshots.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = snapshots.get(&key).cloned();

        let subscription = self.listeners.register(key, listener.clone());

        if let Some(documents) = current {
            listener(SnapshotEvent::snapshot(documents));
        }
        drop(snapshots);

        subscription
    }
}
