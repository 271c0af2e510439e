//! Background workers.

pub mod aggregation_worker;

pub use aggregation_worker::{AggregationJob, AggregationWorker, WorkerHandle};
