use serde::{Deserialize, Serialize};

/// The two source collections the engine follows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    WorkOrders,
    BillingDocuments,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::WorkOrders, Collection::BillingDocuments];

    /// Collection name as known to the remote store.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::WorkOrders => "workOrders",
            Collection::BillingDocuments => "invoices",
        }
    }
}

impl core::fmt::Display for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
