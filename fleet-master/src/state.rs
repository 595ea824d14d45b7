use std::sync::Arc;
use std::time::Duration;

use fleet_core::{EventBus, Registry, Scheduler, SqliteStore, Transfer};

use crate::config::Config;

/// Shared application state, grounded on `ferrex-server`'s `AppState`:
/// one instance, cloned cheaply (every field is an `Arc`) into every
/// handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub registry: Arc<Registry>,
    pub scheduler: Scheduler,
    pub events: Arc<EventBus>,
    pub transfer: Arc<Transfer>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: SqliteStore, config: Config) -> Self {
        let store = Arc::new(store);
        let registry = Arc::new(Registry::with_timeout(Duration::from_secs(config.worker_timeout_seconds)));
        let events = Arc::new(EventBus::new());
        let scheduler = Scheduler::new(store.clone(), registry.clone());
        let transfer = Arc::new(Transfer::new(config.preserve_mode));
        Self { store, registry, scheduler, events, transfer, config: Arc::new(config) }
    }
}
