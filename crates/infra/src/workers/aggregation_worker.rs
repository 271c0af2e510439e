use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use materialflow_core::SessionId;
use materialflow_usage::{aggregate, SourceRecord};

use crate::config::EngineConfig;
use crate::read_model::{PublishError, PublishedState};
use crate::stats::EngineStats;

/// One queued aggregation pass.
///
/// Carries immutable copies of both caches as they were when the pass was
/// triggered, so the worker never observes a collection mid-update.
#[derive(Debug, Clone)]
pub struct AggregationJob {
    pub session: SessionId,
    pub sequence: u64,
    pub work_orders: Arc<Vec<SourceRecord>>,
    pub billing_documents: Arc<Vec<SourceRecord>>,
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Single-consumer aggregation worker.
///
/// - Drains the job queue (optionally skipping to the newest queued job)
/// - Runs the pure aggregation pass off the ingestion thread
/// - Publishes through [`PublishedState`], which drops stale results
#[derive(Debug)]
pub struct AggregationWorker;

impl AggregationWorker {
    pub fn spawn(
        config: &EngineConfig,
        jobs: mpsc::Receiver<AggregationJob>,
        published: Arc<PublishedState>,
        stats: Arc<Mutex<EngineStats>>,
    ) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let name = format!("{}-aggregation", config.name);
        let tick = config.poll_interval;
        let coalesce = config.coalesce_jobs;

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                worker_loop(&name, tick, coalesce, jobs, shutdown_rx, &published, &stats)
            })
            .expect("failed to spawn aggregation worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn worker_loop(
    name: &str,
    tick: Duration,
    coalesce: bool,
    jobs: mpsc::Receiver<AggregationJob>,
    shutdown_rx: mpsc::Receiver<()>,
    published: &PublishedState,
    stats: &Mutex<EngineStats>,
) {
    info!(worker = name, "aggregation worker started");

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match jobs.recv_timeout(tick) {
            Ok(mut job) => {
                if coalesce {
                    let mut superseded = 0u64;
                    while let Ok(newer) = jobs.try_recv() {
                        job = newer;
                        superseded += 1;
                    }
                    if superseded > 0 {
                        debug!(worker = name, superseded, "skipping superseded aggregation passes");
                        if let Ok(mut s) = stats.lock() {
                            s.passes_superseded += superseded;
                        }
                    }
                }
                run_pass(name, job, published, stats);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, "aggregation worker stopped");
}

/// Aggregate one job and try to publish it.
pub(crate) fn run_pass(
    name: &str,
    job: AggregationJob,
    published: &PublishedState,
    stats: &Mutex<EngineStats>,
) {
    let started = Instant::now();
    let snapshot = aggregate(&job.work_orders, &job.billing_documents);
    let materials = snapshot.materials.len();

    match published.publish(job.session, job.sequence, snapshot) {
        Ok(_) => {
            debug!(
                worker = name,
                session = %job.session,
                sequence = job.sequence,
                materials,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "published aggregation pass"
            );
            if let Ok(mut s) = stats.lock() {
                s.passes_published += 1;
            }
        }
        Err(err @ (PublishError::StaleSequence { .. }
        | PublishError::SessionMismatch { .. }
        | PublishError::NoActiveSession)) => {
            debug!(
                worker = name,
                session = %job.session,
                sequence = job.sequence,
                reason = %err,
                "discarding aggregation pass"
            );
            if let Ok(mut s) = stats.lock() {
                s.passes_discarded += 1;
            }
        }
    }
}
