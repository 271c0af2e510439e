//! Strongly-typed identifiers used across the engine.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Identifier of an account, as handed out by the identity provider.
///
/// Exactly one account is active at a time; all cached and derived state is
/// scoped to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

/// Identifier of a source document inside a collection (work order, billing
/// document).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

/// Identifier of one subscription session (one activation of an account).
///
/// A new session is minted on every identity change or explicit reset, so two
/// sign-ins of the same account never share derived state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create an identifier, rejecting blank values.
            pub fn new(value: impl Into<String>) -> DomainResult<Self> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::blank_id($name));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> DomainResult<Self> {
                Self::new(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> DomainResult<Self> {
                Self::new(s)
            }
        }
    };
}

impl_string_newtype!(AccountId, "AccountId");
impl_string_newtype!(RecordId, "RecordId");

impl SessionId {
    /// Create a new session identifier.
    ///
    /// Uses UUIDv7 (time-ordered), so later sessions sort after earlier ones.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id("SessionId", e.to_string()))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_account_id_is_rejected() {
        let err = AccountId::new("   ").unwrap_err();
        assert_eq!(err, DomainError::blank_id("AccountId"));
        assert_eq!(err.kind(), "AccountId");
    }

    #[test]
    fn record_id_parses_and_displays_verbatim() {
        let id: RecordId = "wo-42".parse().unwrap();
        assert_eq!(id.as_str(), "wo-42");
        assert_eq!(id.to_string(), "wo-42");
    }

    #[test]
    fn account_id_serializes_transparently() {
        let id = AccountId::new("user-1").unwrap();
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("user-1"));
    }

    #[test]
    fn blank_record_id_fails_to_deserialize() {
        assert!(serde_json::from_value::<RecordId>(serde_json::json!("")).is_err());
    }

    #[test]
    fn sessions_are_distinct_and_round_trip_through_display() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<SessionId>().unwrap(), a);
    }
}
