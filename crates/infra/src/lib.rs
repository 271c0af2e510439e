//! Engine runtime for streaming materials-usage analytics.
//!
//! - `config`: engine configuration (defaults + environment)
//! - `ingestion`: single-threaded owner of subscriptions, caches and quarantine
//! - `workers`: background aggregation worker
//! - `read_model`: published state cell with change notification
//! - `engine`: wiring and the public [`EngineHandle`]

pub mod config;
pub mod engine;
pub mod ingestion;
pub mod read_model;
pub mod session;
pub mod stats;
pub mod workers;


pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineHandle, MaterialUsageEngine};
pub use read_model::{
    PublishCursor, PublishError, PublishedState, PublishedUsage, SUBSCRIBER_BUFFER,
};
pub use session::Session;
pub use stats::EngineStats;
