//! Engine runtime: wires identity, feeds, ingestion, the aggregation worker and
//! the published state together, and hands back a control handle.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tracing::info;

use materialflow_core::AccountId;
use materialflow_feeds::{ChangeFeed, IdentityProvider, Listener, Subscription};
use materialflow_usage::MaterialUsageStats;

use crate::config::EngineConfig;
use crate::ingestion::{Ingestion, IngestionMessage};
use crate::read_model::{PublishedState, PublishedUsage};
use crate::stats::EngineStats;
use crate::workers::{AggregationWorker, WorkerHandle};

/// Entry point for the streaming materials-usage engine.
#[derive(Debug)]
pub struct MaterialUsageEngine;

impl MaterialUsageEngine {
    /// Start the ingestion thread and aggregation worker, then subscribe to
    /// identity changes.
    ///
    /// The current account (if any) is established immediately.
    pub fn start<F, I>(config: EngineConfig, feed: F, identity: I) -> EngineHandle
    where
        F: ChangeFeed + 'static,
        I: IdentityProvider + 'static,
    {
        let identity = Arc::new(identity);
        let published = Arc::new(PublishedState::new());
        let stats = Arc::new(Mutex::new(EngineStats::default()));

        let (jobs_tx, jobs_rx) = mpsc::channel();
        let worker = AggregationWorker::spawn(&config, jobs_rx, published.clone(), stats.clone());

        let (inbox_tx, inbox_rx) = mpsc::channel();
        let ingestion = Ingestion::new(
            config.name.clone(),
            feed,
            identity.clone(),
            inbox_tx.clone(),
            jobs_tx,
            published.clone(),
            stats.clone(),
        );
        let tick = config.poll_interval;
        let join = thread::Builder::new()
            .name(format!("{}-ingestion", config.name))
            .spawn(move || ingestion.run(inbox_rx, tick))
            .expect("failed to spawn ingestion thread");

        // Notifications only wake the ingestion thread, which reads the
        // provider's account itself; a repeat of the same account is ignored.
        let identity_tx = inbox_tx.clone();
        let listener: Listener<Option<AccountId>> = Arc::new(move |_account| {
            let _ = identity_tx.send(IngestionMessage::IdentityChanged);
        });
        let identity_subscription = identity.subscribe(listener);
        let _ = inbox_tx.send(IngestionMessage::IdentityChanged);

        info!(worker = %config.name, "material usage engine started");

        EngineHandle {
            name: config.name,
            inbox: inbox_tx,
            published,
            stats,
            identity_subscription,
            ingestion: Some(join),
            worker: Some(worker),
        }
    }
}

/// Control and read handle for a running engine.
///
/// Dropping the handle shuts the engine down.
#[derive(Debug)]
pub struct EngineHandle {
    name: String,
    inbox: mpsc::Sender<IngestionMessage>,
    published: Arc<PublishedState>,
    stats: Arc<Mutex<EngineStats>>,
    identity_subscription: Subscription,
    ingestion: Option<thread::JoinHandle<()>>,
    worker: Option<WorkerHandle>,
}

impl EngineHandle {
    /// Latest published result. Never blocks on a running pass.
    pub fn latest(&self) -> Arc<PublishedUsage> {
        self.published.latest()
    }

    /// Receive values published from now on (bounded per subscriber, see
    /// [`PublishedState::subscribe`]).
    pub fn subscribe(&self) -> mpsc::Receiver<Arc<PublishedUsage>> {
        self.published.subscribe()
    }

    pub fn top_materials(&self, limit: usize) -> Vec<MaterialUsageStats> {
        self.latest()
            .snapshot
            .top_materials(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn materials_for_category(&self, category: &str, limit: usize) -> Vec<MaterialUsageStats> {
        self.latest()
            .snapshot
            .materials_for_category(category, limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn commonly_used_with(&self, material: &str, limit: usize) -> Vec<MaterialUsageStats> {
        self.latest()
            .snapshot
            .commonly_used_with(material, limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> EngineStats {
        match self.stats.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Drop quarantine, caches and published state, then re-subscribe for the
    /// current account.
    pub fn reset(&self) {
        info!(worker = %self.name, "engine reset requested");
        let _ = self.inbox.send(IngestionMessage::Reset);
    }

    /// Stop both threads, unsubscribe everything and clear published state.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.identity_subscription.unsubscribe();

        let Some(join) = self.ingestion.take() else {
            return;
        };
        let _ = self.inbox.send(IngestionMessage::Shutdown);
        let _ = join.join();

        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        self.published.deactivate();
        info!(worker = %self.name, "material usage engine stopped");
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
