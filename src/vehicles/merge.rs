//! Merging a validated update onto a vehicle's current state.

use crate::error::{FleetError, Result};
use crate::types::{Anomaly, AnomalyField, Timestamp, Vehicle, VehicleId, VehicleStatus};
use serde::Deserialize;

/// What to do with a passenger count outside `[0, capacity]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampPolicy {
    /// Correct the value and report an anomaly.
    #[default]
    Clamp,
    /// Refuse the whole update.
    Reject,
}

/// A validated partial update. Built by the ingestor; absent fields leave the
/// stored value untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VehiclePatch {
    pub id: VehicleId,
    pub route_number: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub current_stop: Option<String>,
    pub next_stop: Option<String>,
    pub status: Option<VehicleStatus>,
    pub eta: Option<String>,
    pub current_passengers: Option<i64>,
    pub capacity: Option<i64>,
}

impl VehiclePatch {
    /// An empty patch that only touches the timestamp.
    pub fn touch(id: VehicleId) -> Self {
        Self {
            id,
            route_number: None,
            from: None,
            to: None,
            current_stop: None,
            next_stop: None,
            status: None,
            eta: None,
            current_passengers: None,
            capacity: None,
        }
    }
}

/// Merge `patch` onto `current` (or onto a fresh vehicle if there is none).
///
/// Returns the merged vehicle plus any range corrections. Fails only when the
/// policy is [`ClampPolicy::Reject`] and a count is out of range; nothing is
/// mutated in that case since the caller still owns `current`.
pub fn merge_patch(
    current: Option<Vehicle>,
    patch: &VehiclePatch,
    policy: ClampPolicy,
    now: Timestamp,
) -> Result<(Vehicle, Vec<Anomaly>)> {
    let mut vehicle = current.unwrap_or_else(|| Vehicle::new(patch.id.clone()));
    let mut anomalies = Vec::new();

    if let Some(ref route) = patch.route_number {
        vehicle.route_number = route.clone();
    }
    if let Some(ref from) = patch.from {
        vehicle.from = from.clone();
    }
    if let Some(ref to) = patch.to {
        vehicle.to = to.clone();
    }
    if let Some(ref stop) = patch.current_stop {
        vehicle.current_stop = Some(stop.clone());
    }
    if let Some(ref stop) = patch.next_stop {
        vehicle.next_stop = stop.clone();
    }
    if let Some(status) = patch.status {
        vehicle.status = status;
    }
    if let Some(ref eta) = patch.eta {
        vehicle.eta = Some(eta.clone());
    }

    if let Some(reported) = patch.capacity {
        let stored = clamp_to(reported, 0, u32::MAX as i64);
        if stored != reported {
            anomalies.push(Anomaly {
                id: vehicle.id.clone(),
                field: AnomalyField::Capacity,
                reported,
                stored: stored as u32,
            });
        }
        vehicle.capacity = Some(stored as u32);
    }

    // Checked against the effective capacity: the patch's if it carried one,
    // otherwise whatever is already stored. With no capacity known yet only
    // the lower bound applies.
    let max = vehicle.capacity.map_or(u32::MAX as i64, i64::from);
    if let Some(reported) = patch.current_passengers {
        let stored = clamp_to(reported, 0, max);
        if stored != reported {
            anomalies.push(Anomaly {
                id: vehicle.id.clone(),
                field: AnomalyField::CurrentPassengers,
                reported,
                stored: stored as u32,
            });
        }
        vehicle.current_passengers = stored as u32;
    } else if let Some(capacity) = vehicle.capacity {
        if vehicle.current_passengers > capacity {
            // Capacity shrank below the count already on board.
            anomalies.push(Anomaly {
                id: vehicle.id.clone(),
                field: AnomalyField::CurrentPassengers,
                reported: vehicle.current_passengers as i64,
                stored: capacity,
            });
            vehicle.current_passengers = capacity;
        }
    }

    if policy == ClampPolicy::Reject {
        if let Some(anomaly) = anomalies.first() {
            return Err(FleetError::InvalidUpdate(format!(
                "{} {:?} out of range: {}",
                anomaly.id, anomaly.field, anomaly.reported
            )));
        }
    }

    vehicle.last_updated = now;
    Ok((vehicle, anomalies))
}

fn clamp_to(value: i64, min: i64, max: i64) -> i64 {
    value.max(min).min(max)
}
