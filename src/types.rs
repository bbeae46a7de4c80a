//! Core types for the fleet engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable identifier of a tracked vehicle.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        VehicleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VehicleId({})", self.0)
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        VehicleId(s.to_string())
    }
}

impl From<String> for VehicleId {
    fn from(s: String) -> Self {
        VehicleId(s)
    }
}

/// Position in the global event order.
///
/// One sequence number is consumed per successful mutation, whichever vehicle
/// it touched. `Sequence(0)` means "no events yet".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(Sequence(self.0 - 1))
        } else {
            None
        }
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Punctuality of a vehicle. Closed set: there is no third state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VehicleStatus {
    #[default]
    OnTime,
    Delayed,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::OnTime => "OnTime",
            VehicleStatus::Delayed => "Delayed",
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "ontime" => Ok(VehicleStatus::OnTime),
            "delayed" => Ok(VehicleStatus::Delayed),
            _ => Err(format!("unrecognized status {:?}", s)),
        }
    }
}

/// Current reported state of one vehicle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: VehicleId,
    pub route_number: String,
    pub from: String,
    pub to: String,
    /// `None` while between stops and not yet reported.
    pub current_stop: Option<String>,
    pub next_stop: String,
    pub status: VehicleStatus,
    /// Opaque arrival estimate supplied by the feed.
    pub eta: Option<String>,
    pub current_passengers: u32,
    /// `None` until a capacity has been reported or pre-registered.
    pub capacity: Option<u32>,
    pub last_updated: Timestamp,
}

impl Vehicle {
    /// A freshly registered vehicle with nothing reported yet.
    pub fn new(id: VehicleId) -> Self {
        Self {
            id,
            route_number: String::new(),
            from: String::new(),
            to: String::new(),
            current_stop: None,
            next_stop: String::new(),
            status: VehicleStatus::OnTime,
            eta: None,
            current_passengers: 0,
            capacity: None,
            last_updated: Timestamp::default(),
        }
    }

    /// Same reported values, ignoring when they were reported.
    pub fn same_state(&self, other: &Vehicle) -> bool {
        Vehicle {
            last_updated: other.last_updated,
            ..self.clone()
        } == *other
    }
}

/// Raw record from a position feed.
///
/// Every field but the identifier is optional; present fields are merged onto
/// the vehicle's existing state. Unknown fields in the feed are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleUpdate {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub route_number: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub current_stop: Option<String>,
    #[serde(default)]
    pub next_stop: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub eta: Option<String>,
    #[serde(default)]
    pub current_passengers: Option<i64>,
    #[serde(default)]
    pub capacity: Option<i64>,
}

impl VehicleUpdate {
    /// Start an update for the given vehicle.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            ..Default::default()
        }
    }

    pub fn with_route(mut self, route_number: impl Into<String>) -> Self {
        self.route_number = Some(route_number.into());
        self
    }

    pub fn with_endpoints(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self.to = Some(to.into());
        self
    }

    pub fn with_stops(mut self, current: impl Into<String>, next: impl Into<String>) -> Self {
        self.current_stop = Some(current.into());
        self.next_stop = Some(next.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_eta(mut self, eta: impl Into<String>) -> Self {
        self.eta = Some(eta.into());
        self
    }

    pub fn with_passengers(mut self, count: i64) -> Self {
        self.current_passengers = Some(count);
        self
    }

    pub fn with_capacity(mut self, capacity: i64) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// One incremental change in the global event order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiffEvent {
    /// A vehicle was created or updated; carries its full new state.
    Upsert { sequence: Sequence, vehicle: Vehicle },
    /// A vehicle was retired.
    Remove { sequence: Sequence, id: VehicleId },
}

impl DiffEvent {
    pub fn sequence(&self) -> Sequence {
        match self {
            DiffEvent::Upsert { sequence, .. } | DiffEvent::Remove { sequence, .. } => *sequence,
        }
    }

    pub fn vehicle_id(&self) -> &VehicleId {
        match self {
            DiffEvent::Upsert { vehicle, .. } => &vehicle.id,
            DiffEvent::Remove { id, .. } => id,
        }
    }
}

/// Which field an out-of-range correction was applied to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyField {
    CurrentPassengers,
    Capacity,
}

/// A non-fatal data-quality correction made while applying an update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: VehicleId,
    pub field: AnomalyField,
    /// Value as reported by the feed.
    pub reported: i64,
    /// Value actually stored.
    pub stored: u32,
}

/// Engine statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FleetStats {
    pub vehicle_count: u64,
    pub sequence: Sequence,
    pub subscriber_count: u64,
    pub anomalies_clamped: u64,
    pub updates_rejected: u64,
    pub overflow_drops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_navigation() {
        let seq = Sequence(5);
        assert_eq!(seq.next(), Sequence(6));
        assert_eq!(seq.prev(), Some(Sequence(4)));
        assert_eq!(Sequence(0).prev(), None);
    }

    #[test]
    fn test_status_spellings() {
        for s in ["OnTime", "on time", "ON_TIME", "on-time"] {
            assert_eq!(s.parse::<VehicleStatus>(), Ok(VehicleStatus::OnTime));
        }
        assert_eq!("Delayed".parse::<VehicleStatus>(), Ok(VehicleStatus::Delayed));
        assert!("Unknown".parse::<VehicleStatus>().is_err());
        assert!("".parse::<VehicleStatus>().is_err());
    }

    #[test]
    fn test_update_ignores_unknown_fields() {
        let update: VehicleUpdate = serde_json::from_str(
            r#"{"identifier": "bus-1", "currentPassengers": 12, "driver": "x", "lat": 1.5}"#,
        )
        .unwrap();

        assert_eq!(update.identifier.as_deref(), Some("bus-1"));
        assert_eq!(update.current_passengers, Some(12));
        assert_eq!(update.status, None);
    }

    #[test]
    fn test_diff_event_encoding() {
        let event = DiffEvent::Remove {
            sequence: Sequence(7),
            id: VehicleId::from("bus-9"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "remove");
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["id"], "bus-9");
    }

    #[test]
    fn test_same_state_ignores_timestamp() {
        let mut a = Vehicle::new(VehicleId::from("bus-1"));
        let mut b = a.clone();
        a.last_updated = Timestamp(1);
        b.last_updated = Timestamp(2);
        assert!(a.same_state(&b));

        b.current_passengers = 3;
        assert!(!a.same_state(&b));
    }
}
