//! Published usage state: the single cell consumers read from.
//!
//! - Readers clone an `Arc` under a short read lock; a running aggregation pass
//!   never holds this lock.
//! - Writers replace the whole value atomically.
//! - Publication is gated by a cursor (session + last sequence): results from
//!   another session, or older than what is already visible, are rejected.
//! - Every accepted value is broadcast to subscribers in publication order.
//!   Each subscriber buffers at most [`SUBSCRIBER_BUFFER`] values; while its
//!   buffer is full, newer values are dropped for it. `latest()` stays
//!   authoritative.

use std::sync::{mpsc, Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use materialflow_core::{AccountId, SessionId};
use materialflow_usage::UsageSnapshot;

use crate::session::Session;

/// Values buffered per subscriber before further values are dropped for it.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// The latest published aggregation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedUsage {
    /// Session the value belongs to (`None` while signed out).
    pub session: Option<SessionId>,
    pub account: Option<AccountId>,
    /// Sequence of the pass that produced `snapshot` (0 = reset, no pass yet).
    pub sequence: u64,
    pub published_at: Option<DateTime<Utc>>,
    pub snapshot: UsageSnapshot,
}

impl PublishedUsage {
    fn cleared(session: Option<&Session>) -> Self {
        Self {
            session: session.map(|s| s.id()),
            account: session.map(|s| s.account().clone()),
            sequence: 0,
            published_at: None,
            snapshot: UsageSnapshot::default(),
        }
    }
}

/// Publication progress for the active session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PublishCursor {
    session: SessionId,
    last_sequence: u64,
}

impl PublishCursor {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("no active session")]
    NoActiveSession,

    #[error("session mismatch (active={active}, found={found})")]
    SessionMismatch { active: SessionId, found: SessionId },

    #[error("stale aggregation pass (last={last}, found={found})")]
    StaleSequence { last: u64, found: u64 },
}

#[derive(Debug)]
struct Inner {
    latest: Arc<PublishedUsage>,
    cursor: Option<PublishCursor>,
}

/// Atomic "latest value" cell with change notification.
#[derive(Debug)]
pub struct PublishedState {
    inner: RwLock<Inner>,
    subscribers: Mutex<Vec<mpsc::SyncSender<Arc<PublishedUsage>>>>,
}

impl PublishedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value. Never waits on an aggregation pass.
    pub fn latest(&self) -> Arc<PublishedUsage> {
        match self.inner.read() {
            Ok(inner) => inner.latest.clone(),
            Err(poisoned) => poisoned.into_inner().latest.clone(),
        }
    }

    pub fn cursor(&self) -> Option<PublishCursor> {
        match self.inner.read() {
            Ok(inner) => inner.cursor,
            Err(poisoned) => poisoned.into_inner().cursor,
        }
    }

    /// Receive values published from now on.
    ///
    /// A receiver that falls [`SUBSCRIBER_BUFFER`] values behind misses the
    /// values published until it catches up.
    pub fn subscribe(&self) -> mpsc::Receiver<Arc<PublishedUsage>> {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_BUFFER);

        // If the lock is poisoned we still return a receiver;
        // it just won't see any updates.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }

        rx
    }

    /// Clear state and pin publication to `session`.
    pub fn activate(&self, session: &Session) {
        self.replace(
            PublishedUsage::cleared(Some(session)),
            Some(PublishCursor {
                session: session.id(),
                last_sequence: 0,
            }),
        );
    }

    /// Clear state with no active session (signed out or shut down).
    pub fn deactivate(&self) {
        self.replace(PublishedUsage::cleared(None), None);
    }

    /// Publish the result of pass `sequence` started for `session`.
    ///
    /// - Rejects passes from any session other than the active one
    /// - Rejects passes not newer than the last published one
    pub fn publish(
        &self,
        session: SessionId,
        sequence: u64,
        snapshot: UsageSnapshot,
    ) -> Result<Arc<PublishedUsage>, PublishError> {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        let cursor = inner.cursor.ok_or(PublishError::NoActiveSession)?;
        if cursor.session != session {
            return Err(PublishError::SessionMismatch {
                active: cursor.session,
                found: session,
            });
        }
        if sequence <= cursor.last_sequence {
            return Err(PublishError::StaleSequence {
                last: cursor.last_sequence,
                found: sequence,
            });
        }

        let value = Arc::new(PublishedUsage {
            session: Some(session),
            account: inner.latest.account.clone(),
            sequence,
            published_at: Some(Utc::now()),
            snapshot,
        });

        inner.latest = value.clone();
        inner.cursor = Some(PublishCursor {
            session,
            last_sequence: sequence,
        });

        // Broadcast under the write lock so subscribers see publication order.
        self.broadcast(&value);

        Ok(value)
    }

    fn replace(&self, value: PublishedUsage, cursor: Option<PublishCursor>) {
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let value = Arc::new(value);
        inner.latest = value.clone();
        inner.cursor = cursor;
        self.broadcast(&value);
    }

    fn broadcast(&self, value: &Arc<PublishedUsage>) {
        if let Ok(mut subs) = self.subscribers.lock() {
            // Never block a publisher on a slow reader; only disconnected
            // subscribers are removed.
            subs.retain(|tx| match tx.try_send(value.clone()) {
                Ok(()) | Err(mpsc::TrySendError::Full(_)) => true,
                Err(mpsc::TrySendError::Disconnected(_)) => false,
            });
        }
    }
}

impl Default for PublishedState {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                latest: Arc::new(PublishedUsage::cleared(None)),
                cursor: None,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}
