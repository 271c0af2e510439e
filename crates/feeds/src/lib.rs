//! External collaborator contracts: change feeds and the identity provider.
//!
//! The engine never talks to a concrete backend. It depends on the traits in
//! this crate; the in-memory implementations serve tests and local runs.

pub mod collection;
pub mod document;
pub mod feed;
pub mod identity;
pub mod listener;

pub use collection::Collection;
pub use document::{FeedError, RawDocument, SnapshotEvent};
pub use feed::{ChangeFeed, InMemoryChangeFeed};
pub use identity::{IdentityProvider, InMemoryIdentityProvider};
pub use listener::{Listener, ListenerRegistry, RegistryError, Subscription};
