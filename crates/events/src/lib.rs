//! Event plumbing shared across the node.
//!
//! The [`Feed`] replaces a process-wide event singleton: each component gets
//! a feed handle at construction and the feed's lifecycle matches its
//! owner's. Subscriptions buffer independently and a slow consumer is
//! dropped rather than allowed to stall publishers.

mod feed;
mod sync;

pub use feed::{Feed, Subscription, Topical, DEFAULT_SUBSCRIPTION_CAPACITY};
pub use sync::{SyncEvent, SyncTopic};
