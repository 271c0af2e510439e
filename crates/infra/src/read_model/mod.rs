//! Published read model: the latest aggregation result and its cursor.

pub mod published;

pub use published::{
    PublishCursor, PublishError, PublishedState, PublishedUsage, SUBSCRIBER_BUFFER,
};
