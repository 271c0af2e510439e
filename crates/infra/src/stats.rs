use serde::Serialize;

/// Engine runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub sessions_started: u64,
    pub snapshots_received: u64,
    pub feed_errors: u64,
    pub records_quarantined: u64,
    pub passes_started: u64,
    pub passes_superseded: u64,
    pub passes_published: u64,
    pub passes_discarded: u64,
}
