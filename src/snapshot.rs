//! Point-in-time fleet listings.

use crate::error::{FleetError, Result};
use crate::types::{DiffEvent, Sequence, Timestamp, Vehicle, VehicleId};
use crate::vehicles::VehicleStateStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Every vehicle as of one sequence number, ordered by identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Last event reflected in `vehicles`.
    pub sequence: Sequence,
    pub taken_at: Timestamp,
    pub vehicles: Vec<Vehicle>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            sequence: Sequence::default(),
            taken_at: Timestamp::now(),
            vehicles: Vec::new(),
        }
    }

    pub fn get(&self, id: &VehicleId) -> Option<&Vehicle> {
        self.position(id).ok().map(|i| &self.vehicles[i])
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Replay the next diff of the stream onto this snapshot.
    ///
    /// The event must be exactly one past `sequence`; anything else means the
    /// stream was not a gap-free continuation and nothing is changed.
    pub fn apply(&mut self, event: &DiffEvent) -> Result<()> {
        let expected = self.sequence.next();
        if event.sequence() != expected {
            return Err(FleetError::SequenceGap {
                expected,
                got: event.sequence(),
            });
        }

        match event {
            DiffEvent::Upsert { vehicle, .. } => match self.position(&vehicle.id) {
                Ok(i) => self.vehicles[i] = vehicle.clone(),
                Err(i) => self.vehicles.insert(i, vehicle.clone()),
            },
            DiffEvent::Remove { id, .. } => {
                let i = self
                    .position(id)
                    .map_err(|_| FleetError::NotFound(id.clone()))?;
                self.vehicles.remove(i);
            }
        }

        self.sequence = expected;
        Ok(())
    }

    fn position(&self, id: &VehicleId) -> std::result::Result<usize, usize> {
        self.vehicles.binary_search_by(|v| v.id.cmp(id))
    }
}

/// Read-only fleet listing for polling consumers (e.g. a "list all buses"
/// endpoint). Taking a snapshot never registers a subscriber.
#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<VehicleStateStore>,
    high_water: Arc<AtomicU64>,
}

impl SnapshotService {
    pub fn new(store: Arc<VehicleStateStore>) -> Self {
        Self {
            store,
            high_water: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current fleet state.
    ///
    /// Never older than a snapshot this service (or a clone of it) has
    /// already returned; the high-water mark is checked before it is raised.
    pub fn snapshot(&self) -> Snapshot {
        let served = self.high_water.load(Ordering::Acquire);
        let snapshot = self.store.snapshot();
        debug_assert!(
            snapshot.sequence.0 >= served,
            "snapshot at {} is older than one already served at {}",
            snapshot.sequence.0,
            served
        );
        self.high_water
            .fetch_max(snapshot.sequence.0, Ordering::AcqRel);
        snapshot
    }

    /// Just the vehicle list of [`snapshot`](Self::snapshot).
    pub fn vehicles(&self) -> Vec<Vehicle> {
        self.snapshot().vehicles
    }

    pub fn get(&self, id: &VehicleId) -> Result<Vehicle> {
        self.store.get(id)
    }

    /// Highest sequence any snapshot from this service has reflected.
    pub fn latest_served(&self) -> Sequence {
        Sequence(self.high_water.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VehicleStatus;

    fn upsert(seq: u64, id: &str) -> DiffEvent {
        DiffEvent::Upsert {
            sequence: Sequence(seq),
            vehicle: Vehicle::new(VehicleId::from(id)),
        }
    }

    #[test]
    fn test_apply_keeps_order() {
        let mut snapshot = Snapshot::empty();
        snapshot.apply(&upsert(1, "c")).unwrap();
        snapshot.apply(&upsert(2, "a")).unwrap();
        snapshot.apply(&upsert(3, "b")).unwrap();

        let ids: Vec<&str> = snapshot.vehicles.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(snapshot.sequence, Sequence(3));
    }

    #[test]
    fn test_apply_replaces_existing() {
        let mut snapshot = Snapshot::empty();
        snapshot.apply(&upsert(1, "a")).unwrap();

        let mut vehicle = Vehicle::new(VehicleId::from("a"));
        vehicle.status = VehicleStatus::Delayed;
        snapshot
            .apply(&DiffEvent::Upsert {
                sequence: Sequence(2),
                vehicle,
            })
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.get(&VehicleId::from("a")).unwrap().status,
            VehicleStatus::Delayed
        );
    }

    #[test]
    fn test_apply_remove() {
        let mut snapshot = Snapshot::empty();
        snapshot.apply(&upsert(1, "a")).unwrap();
        snapshot
            .apply(&DiffEvent::Remove {
                sequence: Sequence(2),
                id: VehicleId::from("a"),
            })
            .unwrap();

        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_apply_rejects_gap_and_duplicate() {
        let mut snapshot = Snapshot::empty();
        snapshot.apply(&upsert(1, "a")).unwrap();

        // Redelivery
        let result = snapshot.apply(&upsert(1, "a"));
        assert!(matches!(result, Err(FleetError::SequenceGap { .. })));

        // Gap
        let result = snapshot.apply(&upsert(3, "b"));
        assert!(matches!(
            result,
            Err(FleetError::SequenceGap {
                expected: Sequence(2),
                got: Sequence(3)
            })
        ));
        assert_eq!(snapshot.sequence, Sequence(1));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_service_high_water_is_shared() {
        use crate::vehicles::VehiclePatch;

        let store = Arc::new(VehicleStateStore::new());
        let service = SnapshotService::new(Arc::clone(&store));
        let clone = service.clone();

        store.apply(&VehiclePatch::touch(VehicleId::from("a"))).unwrap();
        assert_eq!(clone.snapshot().sequence, Sequence(1));
        assert_eq!(service.latest_served(), Sequence(1));

        store.apply(&VehiclePatch::touch(VehicleId::from("b"))).unwrap();
        let first = service.snapshot();
        let second = clone.snapshot();
        assert!(second.sequence >= first.sequence);
        assert_eq!(clone.latest_served(), Sequence(2));
    }
}
