//! `materialflow-core` — identifiers and the domain error shared by every crate.
//!
//! This crate stays free of infrastructure concerns (no IO, no threads).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AccountId, RecordId, SessionId};
