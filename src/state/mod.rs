//! Analytics persistence.
//!
//! DB writes are offloaded via `spawn_blocking` so sqlite I/O does not
//! block the async runtime.

pub mod database;
pub mod schema;

pub use database::{AnalyticsSummary, Database, ToolStats, TurnRow};

use crate::events::{EventRecord, EventSink};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

/// Event sink that appends every event to the analytics database.
pub struct AnalyticsSink {
    db: Arc<Mutex<Database>>,
    pending: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AnalyticsSink {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self {
            db,
            pending: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    /// Wait for every write issued so far.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Analytics write task failed: {}", e);
            }
        }
    }
}

fn persist(db: &Mutex<Database>, record: &EventRecord) {
    let db = db.blocking_lock();
    if let Err(e) = db.record_event(record) {
        warn!("Failed to persist analytics event {}: {:#}", record.id, e);
    }
}

impl EventSink for AnalyticsSink {
    fn record(&self, record: &EventRecord) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            persist(&self.db, record);
            return;
        };

        let db = self.db.clone();
        let record = record.clone();
        let handle = runtime.spawn_blocking(move || persist(&db, &record));

        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }
}
