use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use materialflow_core::RecordId;

/// A document as delivered by a change feed: its identifier plus untyped fields.
///
/// Serialized flat, i.e. `{"id": "...", "materials": [...], ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl RawDocument {
    pub fn new(id: RecordId, fields: Map<String, JsonValue>) -> Self {
        Self { id, fields }
    }

    /// Build a document from a JSON value; non-object values yield no fields.
    pub fn from_value(id: RecordId, value: JsonValue) -> Self {
        let fields = match value {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        Self { id, fields }
    }
}

/// Out-of-band delivery failure reported by a change feed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("feed transport failure: {0}")]
    Transport(String),

    #[error("feed delivered neither a snapshot nor an error")]
    MissingSnapshot,
}

/// One delivery from a change feed.
///
/// A delivery carries a complete snapshot, an error, or (degenerate) neither.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEvent {
    pub documents: Option<Vec<RawDocument>>,
    pub error: Option<FeedError>,
}

impl SnapshotEvent {
    pub fn snapshot(documents: Vec<RawDocument>) -> Self {
        Self {
            documents: Some(documents),
            error: None,
        }
    }

    pub fn failed(error: FeedError) -> Self {
        Self {
            documents: None,
            error: Some(error),
        }
    }

    /// Resolve the delivery: an error wins over documents; no documents is a
    /// [`FeedError::MissingSnapshot`].
    pub fn into_documents(self) -> Result<Vec<RawDocument>, FeedError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.documents.ok_or(FeedError::MissingSnapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_takes_priority_over_documents() {
        let event = SnapshotEvent {
            documents: Some(vec![]),
            error: Some(FeedError::Transport("reset by peer".to_string())),
        };
        assert_eq!(
            event.into_documents(),
            Err(FeedError::Transport("reset by peer".to_string()))
        );
    }

    #[test]
    fn empty_delivery_is_missing_snapshot() {
        let event = SnapshotEvent {
            documents: None,
            error: None,
        };
        assert_eq!(event.into_documents(), Err(FeedError::MissingSnapshot));
    }

    #[test]
    fn raw_document_reads_flat_json() {
        let doc: RawDocument = serde_json::from_value(json!({
            "id": "wo-1",
            "category": "Kitchen",
            "materials": []
        }))
        .unwrap();
        assert_eq!(doc.id.as_str(), "wo-1");
        assert_eq!(doc.fields.get("category"), Some(&json!("Kitchen")));
        assert!(!doc.fields.contains_key("id"));
    }
}
