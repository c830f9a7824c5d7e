use std::collections::VecDeque;
use std::fmt;

use tokio::sync::broadcast;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;

/// Kind of mutation a watch event reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A single mutation observed on the store.
///
/// For deletions the object is the last state before removal, stamped with
/// the resource version of the deletion itself.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    Added(StoredObject),
    Modified(StoredObject),
    Deleted(StoredObject),
}

impl WatchEvent {
    pub fn kind(&self) -> WatchEventKind {
        match self {
            Self::Added(_) => WatchEventKind::Added,
            Self::Modified(_) => WatchEventKind::Modified,
            Self::Deleted(_) => WatchEventKind::Deleted,
        }
    }

    pub fn object(&self) -> &StoredObject {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }

    pub fn into_object(self) -> StoredObject {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }

    pub fn resource_version(&self) -> u64 {
        self.object().resource_version
    }
}

/// Ordered stream of watch events starting after a given resource version.
///
/// Events already recorded when the watch was opened are replayed from a
/// backlog before live events. Events at or below the last delivered
/// version are skipped, so a backlog/live overlap never duplicates.
pub struct WatchStream {
    backlog: VecDeque<WatchEvent>,
    live: broadcast::Receiver<WatchEvent>,
    last_seen: u64,
}

impl WatchStream {
    pub fn new(
        backlog: impl IntoIterator<Item = WatchEvent>,
        live: broadcast::Receiver<WatchEvent>,
        from_version: u64,
    ) -> Self {
        Self {
            backlog: backlog.into_iter().collect(),
            live,
            last_seen: from_version,
        }
    }

    /// Resource version of the last delivered event.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Next event. `None` when the store closed the stream;
    /// `Some(Err(StoreError::Expired))` when this watcher fell behind and
    /// must relist.
    pub async fn next(&mut self) -> Option<StoreResult<WatchEvent>> {
        loop {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => match self.live.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        return Some(Err(StoreError::Expired(format!(
                            "watcher fell behind by {missed} events after version {}",
                            self.last_seen
                        ))));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            };
            if event.resource_version() <= self.last_seen {
                continue;
            }
            self.last_seen = event.resource_version();
            return Some(Ok(event));
        }
    }
}

impl fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream")
            .field("backlog", &self.backlog.len())
            .field("last_seen", &self.last_seen)
            .finish()
    }
}
