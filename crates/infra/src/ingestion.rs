//! Stream ingestion: the single thread that owns subscriptions, caches and the
//! decode quarantine.
//!
//! Feed and identity callbacks run on whatever thread the source uses; they
//! only enqueue an [`IngestionMessage`]. All state changes happen here, in
//! message order:
//!
//! ```text
//! identity change ─┐
//! feed delivery  ──┼─> ingestion thread ──(AggregationJob)──> aggregation worker
//! reset/shutdown ──┘         │                                      │
//!                            └──── activate/deactivate ──> PublishedState <── publish
//! ```

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use materialflow_core::{AccountId, SessionId};
use materialflow_feeds::{
    ChangeFeed, Collection, IdentityProvider, Listener, SnapshotEvent, Subscription,
};
use materialflow_usage::{RecordDecoder, SourceRecord};

use crate::read_model::PublishedState;
use crate::session::Session;
use crate::stats::EngineStats;
use crate::workers::AggregationJob;

/// Messages processed by the ingestion thread.
#[derive(Debug)]
pub enum IngestionMessage {
    /// The identity provider reported a change. The account is re-read from
    /// the provider when the message is applied, so notifications that arrive
    /// out of order still settle on the provider's current account.
    IdentityChanged,
    /// A feed delivery for `collection`, tagged with the session it was
    /// subscribed under.
    Delivery {
        session: SessionId,
        collection: Collection,
        event: SnapshotEvent,
    },
    /// Re-establish the current session from scratch.
    Reset,
    Shutdown,
}

/// State owned by the ingestion thread.
pub struct Ingestion<F: ChangeFeed, I: IdentityProvider> {
    name: String,
    feed: F,
    identity: I,
    inbox: mpsc::Sender<IngestionMessage>,
    jobs: mpsc::Sender<AggregationJob>,
    published: Arc<PublishedState>,
    stats: Arc<Mutex<EngineStats>>,

    session: Option<Session>,
    /// Set once the first identity message has been applied.
    established: bool,
    subscriptions: Vec<Subscription>,
    decoder: RecordDecoder,
    work_orders: Arc<Vec<SourceRecord>>,
    billing_documents: Arc<Vec<SourceRecord>>,
    sequence: u64,
}

impl<F: ChangeFeed, I: IdentityProvider> Ingestion<F, I> {
    pub fn new(
        name: impl Into<String>,
        feed: F,
        identity: I,
        inbox: mpsc::Sender<IngestionMessage>,
        jobs: mpsc::Sender<AggregationJob>,
        published: Arc<PublishedState>,
        stats: Arc<Mutex<EngineStats>>,
    ) -> Self {
        Self {
            name: name.into(),
            feed,
            identity,
            inbox,
            jobs,
            published,
            stats,
            session: None,
            established: false,
            subscriptions: Vec::new(),
            decoder: RecordDecoder::new(),
            work_orders: Arc::new(Vec::new()),
            billing_documents: Arc::new(Vec::new()),
            sequence: 0,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Process messages until shutdown or until every sender is gone.
    pub fn run(mut self, messages: mpsc::Receiver<IngestionMessage>, tick: Duration) {
        info!(worker = %self.name, "ingestion started");

        loop {
            match messages.recv_timeout(tick) {
                Ok(IngestionMessage::Shutdown) => break,
                Ok(msg) => self.handle(msg),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        self.teardown();
        info!(worker = %self.name, "ingestion stopped");
    }

    /// Apply a single message.
    pub fn handle(&mut self, msg: IngestionMessage) {
        match msg {
            IngestionMessage::IdentityChanged => {
                let account = self.identity.current_account();
                let current = self.session.as_ref().map(|s| s.account());
                if self.established && current == account.as_ref() {
                    debug!(worker = %self.name, "identity unchanged; keeping session");
                    return;
                }
                self.establish(account);
            }
            IngestionMessage::Reset => {
                let account = self.identity.current_account();
                self.establish(account);
            }
            IngestionMessage::Delivery {
                session,
                collection,
                event,
            } => self.on_delivery(session, collection, event),
            IngestionMessage::Shutdown => self.teardown(),
        }
    }

    /// Tear down, reset all state, then subscribe for `account` (if any).
    fn establish(&mut self, account: Option<AccountId>) {
        self.teardown();
        self.established = true;

        let Some(account) = account else {
            self.published.deactivate();
            info!(worker = %self.name, "signed out; derived state cleared");
            return;
        };

        let session = Session::start(account);
        self.published.activate(&session);
        if let Ok(mut s) = self.stats.lock() {
            s.sessions_started += 1;
        }
        info!(
            worker = %self.name,
            account = %session.account(),
            session = %session.id(),
            "subscribing to change feeds"
        );

        for collection in Collection::ALL {
            let inbox = self.inbox.clone();
            let session_id = session.id();
            let listener: Listener<SnapshotEvent> = Arc::new(move |event| {
                // The ingestion thread may already be gone during shutdown.
                let _ = inbox.send(IngestionMessage::Delivery {
                    session: session_id,
                    collection,
                    event,
                });
            });
            let subscription = self.feed.subscribe(session.account(), collection, listener);
            self.subscriptions.push(subscription);
        }

        self.session = Some(session);
    }

    /// Unsubscribe and drop every piece of session state.
    fn teardown(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.session = None;
        self.decoder.reset();
        self.work_orders = Arc::new(Vec::new());
        self.billing_documents = Arc::new(Vec::new());
    }

    fn on_delivery(&mut self, session: SessionId, collection: Collection, event: SnapshotEvent) {
        let Some(active) = self.session.as_ref().map(|s| s.id()) else {
            debug!(worker = %self.name, collection = %collection, "delivery while signed out; dropped");
            return;
        };
        if active != session {
            debug!(
                worker = %self.name,
                collection = %collection,
                stale_session = %session,
                "delivery from superseded session; dropped"
            );
            return;
        }

        let documents = match event.into_documents() {
            Ok(docs) => docs,
            Err(err) => {
                warn!(
                    worker = %self.name,
                    collection = %collection,
                    error = %err,
                    "feed delivery failed; keeping previous snapshot"
                );
                if let Ok(mut s) = self.stats.lock() {
                    s.feed_errors += 1;
                }
                return;
            }
        };

        let decoded = self.decoder.decode_snapshot(collection, &documents, Utc::now());
        debug!(
            worker = %self.name,
            collection = %collection,
            documents = documents.len(),
            records = decoded.records.len(),
            rejected = decoded.rejected.len(),
            skipped = decoded.skipped,
            "snapshot decoded"
        );
        if let Ok(mut s) = self.stats.lock() {
            s.snapshots_received += 1;
            s.records_quarantined += decoded.rejected.len() as u64;
        }

        let records = Arc::new(decoded.records);
        match collection {
            Collection::WorkOrders => self.work_orders = records,
            Collection::BillingDocuments => self.billing_documents = records,
        }

        self.trigger_pass(active);
    }

    fn trigger_pass(&mut self, session: SessionId) {
        self.sequence += 1;
        let job = AggregationJob {
            session,
            sequence: self.sequence,
            work_orders: self.work_orders.clone(),
            billing_documents: self.billing_documents.clone(),
        };

        if self.jobs.send(job).is_err() {
            warn!(worker = %self.name, sequence = self.sequence, "aggregation worker gone; pass dropped");
            return;
        }
        if let Ok(mut s) = self.stats.lock() {
            s.passes_started += 1;
        }
    }
}
