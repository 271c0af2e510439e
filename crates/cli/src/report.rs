//! One-shot usage report: replay a pair of snapshot listings through the
//! engine and answer the requested queries from the published result.

use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use materialflow_core::{AccountId, RecordId};
use materialflow_feeds::{Collection, InMemoryChangeFeed, InMemoryIdentityProvider, RawDocument};
use materialflow_infra::{EngineConfig, EngineStats, MaterialUsageEngine, PublishedUsage};
use materialflow_usage::MaterialUsageStats;

/// What to include besides the top-N list.
#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    pub limit: usize,
    pub category: Option<String>,
    pub with_material: Option<String>,
}

/// A listing element that never reached the engine because it has no usable id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnreadableDocument {
    pub collection: Collection,
    /// Position in the input array.
    pub index: usize,
    /// The `id` value as found, if there was one.
    pub id: Option<String>,
    pub reason: String,
}

/// Documents read from one listing file.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub collection: Collection,
    pub documents: Vec<RawDocument>,
    pub unreadable: Vec<UnreadableDocument>,
}

impl Listing {
    pub fn empty(collection: Collection) -> Self {
        Self {
            collection,
            documents: Vec::new(),
            unreadable: Vec::new(),
        }
    }

    /// Split a JSON array into documents and elements without a usable id.
    ///
    /// Field-level problems are left to the engine's decoder, which
    /// quarantines the document.
    pub fn from_values(collection: Collection, values: Vec<JsonValue>) -> Self {
        let mut listing = Self::empty(collection);

        for (index, value) in values.into_iter().enumerate() {
            let unreadable = |id: Option<String>, reason: &str| UnreadableDocument {
                collection,
                index,
                id,
                reason: reason.to_string(),
            };

            let JsonValue::Object(mut fields) = value else {
                listing.unreadable.push(unreadable(None, "not a JSON object"));
                continue;
            };

            match fields.remove("id") {
                None | Some(JsonValue::Null) => {
                    listing.unreadable.push(unreadable(None, "missing id"));
                }
                Some(JsonValue::String(raw)) => match RecordId::new(raw.clone()) {
                    Ok(id) => listing.documents.push(RawDocument::new(id, fields)),
                    Err(err) => listing.unreadable.push(unreadable(Some(raw), &err.to_string())),
                },
                Some(other) => {
                    listing
                        .unreadable
                        .push(unreadable(Some(other.to_string()), "id is not a string"));
                }
            }
        }

        listing
    }
}

#[derive(Debug, Serialize)]
pub struct CategoryMatches {
    pub query: String,
    pub materials: Vec<MaterialUsageStats>,
}

#[derive(Debug, Serialize)]
pub struct CoUsage {
    pub material: String,
    pub materials: Vec<MaterialUsageStats>,
}

#[derive(Debug, Serialize)]
pub struct UsageReport {
    pub generated_at: DateTime<Utc>,
    pub account: Option<AccountId>,
    /// Documents handed to the engine, per collection.
    pub work_orders: usize,
    pub billing_documents: usize,
    pub unreadable: Vec<UnreadableDocument>,
    /// Documents the engine quarantined as malformed.
    pub quarantined: u64,
    pub distinct_materials: usize,
    pub top_materials: Vec<MaterialUsageStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryMatches>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commonly_used_with: Option<CoUsage>,
}

/// Result of replaying the listings through a short-lived engine.
#[derive(Debug)]
struct EngineRun {
    published: Arc<PublishedUsage>,
    stats: EngineStats,
}

/// Feed both listings to an engine signed in as `account`, wait for the pass
/// that covers both, and build the report from it.
pub fn run_report(
    config: EngineConfig,
    account: AccountId,
    work_orders: Listing,
    billing_documents: Listing,
    request: &ReportRequest,
    timeout: Duration,
) -> Result<UsageReport> {
    let mut unreadable = work_orders.unreadable;
    unreadable.extend(billing_documents.unreadable);
    for doc in &unreadable {
        warn!(
            collection = %doc.collection,
            index = doc.index,
            reason = %doc.reason,
            "document skipped"
        );
    }

    let work_order_count = work_orders.documents.len();
    let billing_count = billing_documents.documents.len();

    let run = replay(
        config,
        account,
        work_orders.documents,
        billing_documents.documents,
        timeout,
    )?;
    let snapshot = &run.published.snapshot;
    let owned = |list: Vec<&MaterialUsageStats>| list.into_iter().cloned().collect::<Vec<_>>();

    Ok(UsageReport {
        generated_at: Utc::now(),
        account: run.published.account.clone(),
        work_orders: work_order_count,
        billing_documents: billing_count,
        unreadable,
        quarantined: run.stats.records_quarantined,
        distinct_materials: snapshot.materials.len(),
        top_materials: owned(snapshot.top_materials(request.limit)),
        category: request.category.as_ref().map(|query| CategoryMatches {
            query: query.clone(),
            materials: owned(snapshot.materials_for_category(query, request.limit)),
        }),
        commonly_used_with: request.with_material.as_ref().map(|material| CoUsage {
            material: material.clone(),
            materials: owned(snapshot.commonly_used_with(material, request.limit)),
        }),
    })
}

fn replay(
    config: EngineConfig,
    account: AccountId,
    work_orders: Vec<RawDocument>,
    billing_documents: Vec<RawDocument>,
    timeout: Duration,
) -> Result<EngineRun> {
    // Stored listings are replayed to the engine's subscriptions on start,
    // one delivery (and one pass) per collection.
    let feed = Arc::new(InMemoryChangeFeed::new());
    feed.publish_snapshot(&account, Collection::WorkOrders, work_orders);
    feed.publish_snapshot(&account, Collection::BillingDocuments, billing_documents);
    let expected = Collection::ALL.len() as u64;

    let tick = config.poll_interval;
    let engine = MaterialUsageEngine::start(config, feed, InMemoryIdentityProvider::signed_in(account));
    let updates = engine.subscribe();

    let deadline = Instant::now() + timeout;
    loop {
        let latest = engine.latest();
        if latest.sequence >= expected {
            let stats = engine.stats();
            debug!(sequence = latest.sequence, ?stats, "replay complete");
            engine.shutdown();
            return Ok(EngineRun {
                published: latest,
                stats,
            });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            bail!("engine did not publish a result within {timeout:?}");
        }
        match updates.recv_timeout(remaining.min(tick)) {
            Ok(_) | Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => bail!("engine stopped before publishing"),
        }
    }
}
