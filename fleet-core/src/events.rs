//! Fanout for the `/ws` event bus (spec.md §6.1 "Event bus"), grounded on
//! ferrex's websocket `Connection`/broadcast plumbing but backed by
//! `tokio::sync::broadcast` instead of a per-connection `mpsc` registry,
//! since every event here is a public snapshot with no per-client routing.

use fleet_model::{FileRecord, Statistics, WorkerRecord};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel. A client lagging behind by more than
/// this many events has its connection dropped and must reconnect and
/// re-fetch a fresh `/api/status` snapshot (spec.md §6.1 "Lagging
/// subscribers").
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    FileUpdated { file: FileRecord },
    WorkerUpdated { worker: WorkerRecord },
    WorkerOffline { worker_id: String },
    StatisticsUpdated { statistics: Statistics },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish: if nobody is subscribed, `send` errors with
    /// `SendError` and we drop it on the floor, matching the original's
    /// "broadcast to whoever's listening" websocket behavior.
    pub fn publish(&self, event: FleetEvent) {
        let _ = self.sender.send(event);
    }
}
