//! Authoritative in-memory vehicle registry.

use crate::error::{FleetError, Result};
use crate::snapshot::Snapshot;
use crate::types::{Anomaly, DiffEvent, Sequence, Timestamp, Vehicle, VehicleId};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::merge::{merge_patch, ClampPolicy, VehiclePatch};

/// The vehicle map and the sequence counter. Always mutated together under
/// one write guard, so readers never see one without the other.
#[derive(Default)]
struct FleetState {
    vehicles: BTreeMap<VehicleId, Vehicle>,
    sequence: Sequence,
}

/// Outcome of a successful [`VehicleStateStore::apply`].
#[derive(Clone, Debug)]
pub struct Applied {
    pub event: DiffEvent,
    pub anomalies: Vec<Anomaly>,
}

/// Map of vehicle identifier to current state.
///
/// Reads are open to everyone. Mutators are crate-private: they are only
/// reached through [`crate::Fleet`], which pairs each mutation with its
/// publish under a single write lock.
pub struct VehicleStateStore {
    state: RwLock<FleetState>,
    policy: ClampPolicy,
}

impl VehicleStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_policy(ClampPolicy::default())
    }

    /// Create an empty store with a specific out-of-range policy.
    pub fn with_policy(policy: ClampPolicy) -> Self {
        Self {
            state: RwLock::new(FleetState::default()),
            policy,
        }
    }

    // --- Reads ---

    /// Get a vehicle by identifier.
    pub fn get(&self, id: &VehicleId) -> Result<Vehicle> {
        self.state
            .read()
            .vehicles
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &VehicleId) -> bool {
        self.state.read().vehicles.contains_key(id)
    }

    /// All vehicles, ordered by identifier, at one sequence number.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot {
            sequence: state.sequence,
            taken_at: Timestamp::now(),
            vehicles: state.vehicles.values().cloned().collect(),
        }
    }

    /// Sequence of the most recent mutation.
    pub fn sequence(&self) -> Sequence {
        self.state.read().sequence
    }

    pub fn len(&self) -> usize {
        self.state.read().vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().vehicles.is_empty()
    }

    // --- Mutations ---

    /// Merge a validated update and advance the sequence by one.
    pub(crate) fn apply(&self, patch: &VehiclePatch) -> Result<Applied> {
        let mut state = self.state.write();

        let current = state.vehicles.get(&patch.id).cloned();
        let (vehicle, anomalies) = merge_patch(current, patch, self.policy, Timestamp::now())?;

        let sequence = state.sequence.next();
        state.sequence = sequence;
        state.vehicles.insert(vehicle.id.clone(), vehicle.clone());

        tracing::debug!(id = %vehicle.id, seq = sequence.0, "applied vehicle update");

        Ok(Applied {
            event: DiffEvent::Upsert { sequence, vehicle },
            anomalies,
        })
    }

    /// Evict a vehicle. Consumes a sequence number only if it existed.
    pub(crate) fn remove(&self, id: &VehicleId) -> Result<DiffEvent> {
        let mut state = self.state.write();

        if state.vehicles.remove(id).is_none() {
            return Err(FleetError::NotFound(id.clone()));
        }

        let sequence = state.sequence.next();
        state.sequence = sequence;

        tracing::debug!(id = %id, seq = sequence.0, "removed vehicle");

        Ok(DiffEvent::Remove {
            sequence,
            id: id.clone(),
        })
    }

    /// Install vehicles loaded at startup. No sequence number is consumed and
    /// no event is produced; later entries for the same id win.
    pub(crate) fn seed(&self, vehicles: impl IntoIterator<Item = Vehicle>) -> usize {
        let mut state = self.state.write();
        let before = state.vehicles.len();
        for vehicle in vehicles {
            state.vehicles.insert(vehicle.id.clone(), vehicle);
        }
        state.vehicles.len() - before
    }
}

impl Default for VehicleStateStore {
    fn default() -> Self {
        Self::new()
    }
}
