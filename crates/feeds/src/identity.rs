//! Identity provider abstraction (the active account and its changes).

use std::sync::{Arc, Mutex, RwLock};

use tracing::{info, warn};

use materialflow_core::AccountId;

use crate::listener::{Listener, ListenerRegistry, Subscription};

/// Source of the currently active account.
///
/// `None` means signed out. Listeners are invoked on every change, from any
/// thread.
pub trait IdentityProvider: Send + Sync {
    fn current_account(&self) -> Option<AccountId>;

    fn subscribe(&self, listener: Listener<Option<AccountId>>) -> Subscription;
}

impl<P> IdentityProvider for Arc<P>
where
    P: IdentityProvider + ?Sized,
{
    fn current_account(&self) -> Option<AccountId> {
        (**self).current_account()
    }

    fn subscribe(&self, listener: Listener<Option<AccountId>>) -> Subscription {
        (**self).subscribe(listener)
    }
}

/// In-memory identity provider for tests/dev.
#[derive(Debug)]
pub struct InMemoryIdentityProvider {
    current: RwLock<Option<AccountId>>,
    /// Held across update + dispatch so listeners hear changes in the order
    /// they were applied. `current` itself is released before dispatch, so a
    /// listener may call `current_account`.
    changes: Mutex<()>,
    listeners: Arc<ListenerRegistry<(), Option<AccountId>>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(account: AccountId) -> Self {
        let provider = Self::default();
        if let Ok(mut current) = provider.current.write() {
            *current = Some(account);
        }
        provider
    }

    pub fn sign_in(&self, account: AccountId) {
        self.set_account(Some(account));
    }

    pub fn sign_out(&self) {
        self.set_account(None);
    }

    /// Change the active account; listeners hear about it only if it differs.
    pub fn set_account(&self, account: Option<AccountId>) {
        let _ordered = match self.changes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        {
            let mut current = match self.current.write() {
                Ok(c) => c,
                Err(_) => {
                    warn!("identity provider lock poisoned; change ignored");
                    return;
                }
            };
            if *current == account {
                return;
            }
            *current = account.clone();
        }

        info!(signed_in = account.is_some(), "active account changed");
        let _ = self.listeners.dispatch(&(), account);
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
            changes: Mutex::new(()),
            listeners: ListenerRegistry::new(),
        }
    }
}

impl IdentityProvider for InMemoryIdentityProvider {
    fn current_account(&self) -> Option<AccountId> {
        self.current.read().ok().and_then(|c| c.clone())
    }

    fn subscribe(&self, listener: Listener<Option<AccountId>>) -> Subscription {
        self.listeners.register((), listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn notifies_only_on_actual_change() {
        let provider = InMemoryIdentityProvider::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = provider.subscribe(Arc::new(move |account: Option<AccountId>| {
            sink.lock().unwrap().push(account);
        }));

        let alice = AccountId::new("alice").unwrap();
        provider.sign_in(alice.clone());
        provider.sign_in(alice.clone());
        provider.sign_out();

        assert_eq!(*seen.lock().unwrap(), vec![Some(alice), None]);
        assert_eq!(provider.current_account(), None);
    }

    #[test]
    fn last_notification_matches_current_account_under_contention() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let last = Arc::new(Mutex::new(None));
        let sink = last.clone();
        let reader = provider.clone();
        let _sub = provider.subscribe(Arc::new(move |account: Option<AccountId>| {
            // Reading the provider from inside a delivery must not deadlock.
            let _ = reader.current_account();
            *sink.lock().unwrap() = account;
        }));

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let provider = provider.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let account = AccountId::new(format!("user-{}", (t + i) % 3)).unwrap();
                        provider.sign_in(account);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(*last.lock().unwrap(), provider.current_account());
    }

    #[test]
    fn signed_in_constructor_sets_current_account() {
        let alice = AccountId::new("alice").unwrap();
        let provider = InMemoryIdentityProvider::signed_in(alice.clone());
        assert_eq!(provider.current_account(), Some(alice));
    }
}
