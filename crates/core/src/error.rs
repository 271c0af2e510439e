//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Identifier and value failures shared by every crate.
///
/// Feed transport and document decode failures are reported by the crates
/// that own them (`FeedError`, `DecodeError`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was blank.
    #[error("{kind} must not be blank")]
    BlankId { kind: &'static str },

    /// An identifier could not be parsed.
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },
}

impl DomainError {
    pub fn blank_id(kind: &'static str) -> Self {
        Self::BlankId { kind }
    }

    pub fn invalid_id(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            kind,
            reason: reason.into(),
        }
    }

    /// Name of the identifier type that was rejected.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BlankId { kind } | Self::InvalidId { kind, .. } => kind,
        }
    }
}
