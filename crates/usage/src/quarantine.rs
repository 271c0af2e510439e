//! Decode quarantine: permanent per-collection exclusion of malformed records.
//!
//! A document that fails to decode once is skipped on every later snapshot of
//! the same session, so a permanently broken record logs exactly one error.
//! The set is cleared when the session changes (account switch or reset).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use materialflow_core::RecordId;
use materialflow_feeds::{Collection, RawDocument};

use crate::decode::{decode, DecodeError};
use crate::record::SourceRecord;

/// Record identifiers whose decode has permanently failed, per collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuarantineSet {
    ids: BTreeMap<Collection, BTreeSet<RecordId>>,
}

impl QuarantineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, collection: Collection, id: &RecordId) -> bool {
        self.ids.get(&collection).is_some_and(|ids| ids.contains(id))
    }

    /// Returns `true` if the id was newly quarantined.
    pub fn insert(&mut self, collection: Collection, id: RecordId) -> bool {
        self.ids.entry(collection).or_default().insert(id)
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.ids.get(&collection).map_or(0, |ids| ids.len())
    }

    pub fn total(&self) -> usize {
        self.ids.values().map(|ids| ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn ids(&self, collection: Collection) -> impl Iterator<Item = &RecordId> {
        self.ids.get(&collection).into_iter().flatten()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// Result of decoding one snapshot.
#[derive(Debug, Clone, Default)]
pub struct DecodedSnapshot {
    /// Successfully decoded records, in delivery order.
    pub records: Vec<SourceRecord>,
    /// Documents that failed for the first time during this snapshot.
    pub rejected: Vec<(RecordId, DecodeError)>,
    /// Documents skipped because they were already quarantined.
    pub skipped: usize,
}

/// Decoder that remembers failures across snapshots.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    quarantine: QuarantineSet,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quarantine(&self) -> &QuarantineSet {
        &self.quarantine
    }

    /// Forget every quarantined id (new session).
    pub fn reset(&mut self) {
        self.quarantine.clear();
    }

    /// Decode every document of a snapshot.
    ///
    /// Never fails as a whole: bad documents are logged once, quarantined and
    /// left out of `records`.
    pub fn decode_snapshot(
        &mut self,
        collection: Collection,
        documents: &[RawDocument],
        now: DateTime<Utc>,
    ) -> DecodedSnapshot {
        let mut out = DecodedSnapshot {
            records: Vec::with_capacity(documents.len()),
            ..DecodedSnapshot::default()
        };

        for doc in documents {
            if self.quarantine.contains(collection, &doc.id) {
                out.skipped += 1;
                continue;
            }

            match decode(doc, collection, now) {
                Ok(record) => out.records.push(record),
                Err(err) => {
                    warn!(
                        collection = %collection,
                        record_id = %doc.id,
                        kind = %err.kind,
                        path = %err.path,
                        error = %err.message,
                        "document failed to decode; quarantined"
                    );
                    self.quarantine.insert(collection, doc.id.clone());
                    out.rejected.push((doc.id.clone(), err));
                }
            }
        }

        if out.skipped > 0 {
            debug!(collection = %collection, skipped = out.skipped, "skipped quarantined documents");
        }

        out
    }
}
