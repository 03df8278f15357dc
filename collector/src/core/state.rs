use std::sync::{Arc, RwLock};

use tokio::sync::Notify;

use common::config::Config;

use crate::core::inventory::Inventory;
use crate::core::storage::Storage;

/// Shared collector state. The storage graph takes all writes behind the
/// write lock (one writer: the refresh cycle); the query surface reads
/// concurrently through the read lock.
#[derive(Clone)]
pub struct CollectorState {
    pub config: Arc<Config>,
    pub storage: Arc<RwLock<Storage>>,
    pub inventory: Arc<Inventory>,
    /// Forced-update trigger for the refresh loop.
    pub refresh_notify: Arc<Notify>,
}

impl CollectorState {
    pub fn new(config: Arc<Config>, inventory: Arc<Inventory>) -> Self {
        CollectorState {
            config,
            storage: Arc::new(RwLock::new(Storage::new())),
            inventory,
            refresh_notify: Arc::new(Notify::new()),
        }
    }
}
