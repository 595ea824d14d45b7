//! Core coordination logic for the fleet transcoding controller: the
//! durable queue (Store), the volatile worker bookkeeping (Registry), job
//! assignment (Scheduler), worker-health sweeping (Monitor), the
//! client-facing event bus, and the safe in-place file replacement
//! protocol (Transfer). `fleet-master` wires these together behind HTTP;
//! `fleet-worker` and `fleetctl` only depend on `fleet-model`.

pub mod error;
pub mod events;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod transfer;

pub use error::{Error, Result};
pub use events::{EventBus, FleetEvent};
pub use monitor::Monitor;
pub use registry::Registry;
pub use scheduler::Scheduler;
pub use store::{SqliteStore, Store};
pub use transfer::Transfer;
