//! Sync lifecycle events published by the block fetcher.

use crate::feed::Topical;

/// Lifecycle of a chain-sync attempt, as seen by the mining layer.
///
/// Payloads are deliberately opaque; consumers match on the variant only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A sync run started; block production must pause.
    Started,
    /// Sync finished successfully.
    Done,
    /// Sync aborted; another attempt may follow.
    Failed,
}

/// Topic key for [`SyncEvent`] subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTopic {
    Started,
    Done,
    Failed,
}

impl Topical for SyncEvent {
    type Topic = SyncTopic;

    fn topic(&self) -> SyncTopic {
        match self {
            SyncEvent::Started => SyncTopic::Started,
            SyncEvent::Done => SyncTopic::Done,
            SyncEvent::Failed => SyncTopic::Failed,
        }
    }
}
