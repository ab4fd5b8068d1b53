//! # Snapshot Store
//!
//! Holds the one current `Snapshot` and the change channel listeners subscribe
//! to. The poller is the only writer; everything else reads. Replacing the
//! snapshot swaps an `Arc`, so readers holding the previous one keep a
//! consistent view until they drop it.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::election::snapshot::Snapshot;

/// Buffered change events per listener before it starts lagging.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Shared handle on the current snapshot. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    current: Arc<RwLock<Option<Arc<Snapshot>>>>,
    changes: broadcast::Sender<Arc<Snapshot>>,
}

impl SnapshotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            current: Arc::new(RwLock::new(None)),
            changes,
        }
    }

    /// The current snapshot, if one has been adopted.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// True once a snapshot has been adopted.
    pub fn is_populated(&self) -> bool {
        self.current.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Receives every snapshot published through [`SnapshotStore::publish`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.changes.subscribe()
    }

    /// Installs `snapshot` without notifying listeners.
    pub fn adopt(&self, snapshot: Arc<Snapshot>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Installs `snapshot` and notifies listeners. Returns how many listeners
    /// were reached.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> usize {
        self.adopt(Arc::clone(&snapshot));
        self.changes.send(snapshot).unwrap_or(0)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
