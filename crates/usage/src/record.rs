//! Typed source records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use materialflow_core::RecordId;
use materialflow_feeds::Collection;

/// De-duplication key for a material: trimmed and lower-cased.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Replace non-finite numbers (NaN, ±inf) with zero.
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// A material line embedded in a work order or billing document.
///
/// `quantity` and `unit_cost` are stored as received and may be non-finite;
/// they are sanitized during aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub name: String,
    pub quantity: f64,
    pub unit_cost: f64,
    pub unit: Option<String>,
}

impl MaterialRecord {
    pub fn new(name: impl Into<String>, quantity: f64, unit_cost: f64) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit_cost,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    WorkOrder,
    BillingDocument,
}

impl RecordKind {
    pub fn collection(&self) -> Collection {
        match self {
            RecordKind::WorkOrder => Collection::WorkOrders,
            RecordKind::BillingDocument => Collection::BillingDocuments,
        }
    }
}

impl From<Collection> for RecordKind {
    fn from(value: Collection) -> Self {
        match value {
            Collection::WorkOrders => RecordKind::WorkOrder,
            Collection::BillingDocuments => RecordKind::BillingDocument,
        }
    }
}

/// A decoded work order or billing document.
///
/// `category` is the job category for work orders and the title for billing
/// documents. `timestamp` is the creation date (work orders) or due date
/// (billing documents); `None` sorts as the oldest possible time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: RecordId,
    pub kind: RecordKind,
    pub category: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub materials: Vec<MaterialRecord>,
}

impl SourceRecord {
    pub fn work_order(
        id: RecordId,
        category: impl Into<String>,
        created_at: Option<DateTime<Utc>>,
        materials: Vec<MaterialRecord>,
    ) -> Self {
        Self {
            id,
            kind: RecordKind::WorkOrder,
            category: category.into(),
            timestamp: created_at,
            materials,
        }
    }

    pub fn billing_document(
        id: RecordId,
        title: impl Into<String>,
        due_at: DateTime<Utc>,
        materials: Vec<MaterialRecord>,
    ) -> Self {
        Self {
            id,
            kind: RecordKind::BillingDocument,
            category: title.into(),
            timestamp: Some(due_at),
            materials,
        }
    }
}
