//! `materialflow-usage` — materials-usage analytics over work orders and
//! billing documents.
//!
//! **Responsibility:** the pure part of the engine.
//! - Decode raw documents into typed records, quarantining the ones that fail.
//! - Aggregate records into per-material statistics and a co-occurrence table.
//! - Answer ranked read queries over an aggregation result.
//!
//! Nothing here spawns threads or holds shared state; the runtime lives in
//! `materialflow-infra`.

pub mod aggregate;
pub mod decode;
pub mod quarantine;
pub mod query;
pub mod record;

pub use aggregate::{
    aggregate, CoOccurrenceTable, MaterialAccumulator, MaterialUsageStats, UsageFold, UsageSnapshot,
};
pub use decode::{decode, DecodeError, DecodeErrorKind};
pub use quarantine::{DecodedSnapshot, QuarantineSet, RecordDecoder};
pub use query::{commonly_used_with, materials_for_category, top_materials, usage_ranking};
pub use record::{normalize_name, sanitize, MaterialRecord, RecordKind, SourceRecord};
