use materialflow_core::{AccountId, SessionId};

/// One activation of an account's subscriptions.
///
/// Threaded through feed listeners, aggregation jobs and publication so that
/// nothing started for one session can land in another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    account: AccountId,
}

impl Session {
    pub fn start(account: AccountId) -> Self {
        Self {
            id: SessionId::new(),
            account,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }
}
