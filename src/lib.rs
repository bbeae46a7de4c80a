//! # Fleetcast
//!
//! Live vehicle-state dissemination: an in-memory registry of vehicle state,
//! an ingestion path for position/status updates, and a fan-out that streams
//! incremental changes to subscribers while keeping snapshot reads consistent
//! with the stream.
//!
//! ## Core Concepts
//!
//! - **Vehicles**: current reported state per vehicle, merged field-by-field
//! - **Diff events**: upserts and removals, totally ordered by a global sequence
//! - **Snapshots**: every vehicle as of one sequence number
//! - **Subscribers**: bounded queues fed in sequence order; slow ones are dropped
//!
//! ## Example
//!
//! ```ignore
//! use fleetcast::{Fleet, FleetConfig, VehicleUpdate};
//!
//! let fleet = Fleet::new(FleetConfig::default());
//!
//! // Viewer joins: snapshot plus a gap-free stream after it
//! let subscription = fleet.subscribe();
//!
//! // Feed reports a position
//! fleet.ingest(
//!     &VehicleUpdate::new("bus-12")
//!         .with_route("7")
//!         .with_stops("Market St", "Pier 39")
//!         .with_status("Delayed"),
//! )?;
//!
//! let mut view = subscription.snapshot;
//! view.apply(&subscription.handle.recv()?)?;
//! ```

pub mod broadcast;
pub mod error;
pub mod fleet;
pub mod ingest;
pub mod persistence;
pub mod snapshot;
pub mod types;
pub mod vehicles;

// Re-exports
pub use broadcast::{
    BroadcastHub, CloseReason, SubscriberConfig, SubscriberHandle, SubscriberId, SubscriberState,
};
pub use error::{FleetError, Result};
pub use fleet::{Fleet, FleetConfig, Subscription};
pub use ingest::{IngestReport, UpdateIngestor};
pub use persistence::{FileRepository, MemoryRepository, VehicleRepository};
pub use snapshot::{Snapshot, SnapshotService};
pub use types::*;
pub use vehicles::{Applied, ClampPolicy, VehiclePatch, VehicleStateStore};
