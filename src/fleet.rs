//! Main Fleet struct tying all components together.

use crate::broadcast::{BroadcastHub, SubscriberConfig, SubscriberHandle, SubscriberId};
use crate::error::Result;
use crate::ingest::{IngestReport, UpdateIngestor};
use crate::persistence::VehicleRepository;
use crate::snapshot::{Snapshot, SnapshotService};
use crate::types::{DiffEvent, FleetStats, Vehicle, VehicleId, VehicleUpdate};
use crate::vehicles::{ClampPolicy, VehicleStateStore};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;

/// Fleet configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Queue bound for subscribers joined with [`Fleet::subscribe`].
    pub subscriber_buffer: usize,

    /// Handling of passenger counts outside `[0, capacity]`.
    pub clamp_policy: ClampPolicy,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 1024,
            clamp_policy: ClampPolicy::Clamp,
        }
    }
}

/// A newly joined subscriber: the fleet as of `snapshot.sequence`, and a
/// handle whose first event is `snapshot.sequence + 1`.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriberHandle,
    pub snapshot: Snapshot,
}

/// The live-state dissemination engine.
///
/// All mutations and all subscriber joins pass through one write lock, which
/// makes each of these indivisible with respect to the others:
/// - apply an update and publish its event
/// - remove a vehicle and publish its event
/// - take a snapshot and start streaming to a new subscriber
///
/// Lock order: `write_lock`, then the store's state lock, then the hub's
/// registry lock. Snapshot reads only take the store's read lock and never
/// wait on `write_lock`.
pub struct Fleet {
    config: FleetConfig,

    /// Vehicle state (shared with the snapshot service).
    store: Arc<VehicleStateStore>,

    /// Subscriber registry.
    hub: BroadcastHub,

    /// Validation and data-quality counters.
    ingestor: UpdateIngestor,

    /// Polling reads.
    snapshots: SnapshotService,

    /// Serializes apply+publish and snapshot+activate.
    write_lock: Mutex<()>,
}

impl Fleet {
    /// Create an empty fleet.
    pub fn new(config: FleetConfig) -> Self {
        let store = Arc::new(VehicleStateStore::with_policy(config.clamp_policy));
        let snapshots = SnapshotService::new(Arc::clone(&store));

        Self {
            config,
            store,
            hub: BroadcastHub::new(),
            ingestor: UpdateIngestor::new(),
            snapshots,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a fleet seeded from durable storage.
    ///
    /// Loaded vehicles are present in the first snapshot but consume no
    /// sequence numbers.
    pub fn open(config: FleetConfig, repo: &dyn VehicleRepository) -> Result<Self> {
        let fleet = Self::new(config);
        let vehicles = repo.load()?;
        let loaded = fleet.store.seed(vehicles);

        tracing::info!(vehicles = loaded, "fleet opened");
        Ok(fleet)
    }

    /// Replace the durable contents with the current fleet, so removed
    /// vehicles stay removed after a restart. Returns how many were saved.
    pub fn persist(&self, repo: &dyn VehicleRepository) -> Result<usize> {
        let snapshot = self.store.snapshot();
        repo.replace_all(&snapshot.vehicles)?;
        repo.flush()?;

        tracing::info!(
            vehicles = snapshot.vehicles.len(),
            seq = snapshot.sequence.0,
            "fleet persisted"
        );
        Ok(snapshot.vehicles.len())
    }

    // --- Ingestion ---

    /// Validate and apply an update, publishing its event.
    pub fn ingest(&self, update: &VehicleUpdate) -> Result<DiffEvent> {
        self.ingest_report(update).map(|report| report.event)
    }

    /// Like [`ingest`](Self::ingest), also returning any range corrections.
    pub fn ingest_report(&self, update: &VehicleUpdate) -> Result<IngestReport> {
        let patch = self.ingestor.validate(update)?;

        let applied = {
            let _lock = self.write_lock.lock();

            let applied = self.store.apply(&patch).map_err(|e| {
                self.ingestor.record_rejection();
                tracing::warn!(id = %patch.id, error = %e, "rejected vehicle update");
                e
            })?;
            self.hub.publish(&applied.event);
            applied
        };

        self.ingestor.record_anomalies(&applied.anomalies);

        Ok(IngestReport {
            event: applied.event,
            anomalies: applied.anomalies,
        })
    }

    /// Decode a JSON feed record and ingest it.
    pub fn ingest_json(&self, bytes: &[u8]) -> Result<IngestReport> {
        let update = self.ingestor.parse(bytes)?;
        self.ingest_report(&update)
    }

    /// Retire a vehicle and publish its removal.
    pub fn remove(&self, id: &VehicleId) -> Result<DiffEvent> {
        let _lock = self.write_lock.lock();

        let event = self.store.remove(id)?;
        self.hub.publish(&event);

        tracing::info!(id = %id, seq = event.sequence().0, "vehicle removed");
        Ok(event)
    }

    // --- Streaming ---

    /// Join with the default queue bound.
    pub fn subscribe(&self) -> Subscription {
        let config = SubscriberConfig {
            buffer_size: self.config.subscriber_buffer,
        };
        self.subscribe_with(&config)
    }

    /// Join with an explicit subscriber configuration.
    ///
    /// The snapshot and the start of streaming happen under the write lock,
    /// so every event after the snapshot is delivered and none before it is.
    pub fn subscribe_with(&self, config: &SubscriberConfig) -> Subscription {
        let handle = self.hub.register(config);

        let snapshot = {
            let _lock = self.write_lock.lock();
            let snapshot = self.store.snapshot();
            self.hub.activate(handle.id, snapshot.sequence);
            snapshot
        };

        tracing::info!(
            subscriber = %handle.id,
            seq = snapshot.sequence.0,
            vehicles = snapshot.vehicles.len(),
            "subscriber joined"
        );

        Subscription { handle, snapshot }
    }

    /// Stop delivering to a subscriber. Idempotent.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.hub.unsubscribe(id)
    }

    // --- Reads ---

    /// Current fleet state, without subscribing.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.snapshot()
    }

    /// A cloneable read-only view for polling consumers.
    pub fn snapshot_service(&self) -> SnapshotService {
        self.snapshots.clone()
    }

    /// Get a vehicle by identifier.
    pub fn get(&self, id: &VehicleId) -> Result<Vehicle> {
        self.store.get(id)
    }

    pub fn store(&self) -> &VehicleStateStore {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn ingestor(&self) -> &UpdateIngestor {
        &self.ingestor
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Get fleet statistics.
    pub fn stats(&self) -> FleetStats {
        FleetStats {
            vehicle_count: self.store.len() as u64,
            sequence: self.store.sequence(),
            subscriber_count: self.hub.subscriber_count() as u64,
            anomalies_clamped: self.ingestor.anomalies(),
            updates_rejected: self.ingestor.rejected(),
            overflow_drops: self.hub.overflow_drops(),
        }
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new(FleetConfig::default())
    }
}
