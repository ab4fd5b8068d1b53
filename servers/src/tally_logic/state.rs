use lib_tally::core::{ConnectionRegistry, SnapshotStore};
use lib_tally::election::ElectionCalendar;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    // Live subscriber connections
    pub registry: Arc<ConnectionRegistry>,
    // Current snapshot, written by the poller only
    pub store: SnapshotStore,
    pub calendar: ElectionCalendar,
    // Text file served at /api.txt
    pub api_doc_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(calendar: ElectionCalendar, api_doc_path: PathBuf) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            store: SnapshotStore::new(),
            calendar,
            api_doc_path: Arc::new(api_doc_path),
        }
    }
}
