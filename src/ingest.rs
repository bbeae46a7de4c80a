//! Validation of raw feed records.
//!
//! The ingestor turns a [`VehicleUpdate`] into a [`VehiclePatch`] or rejects
//! it. Rejection happens before the store is touched, so a rejected update
//! consumes no sequence number and produces no event. Applying the patch is
//! done by [`crate::Fleet::ingest`], which runs it through the fleet's write
//! lock together with the publish.

use crate::error::{FleetError, Result};
use crate::types::{Anomaly, DiffEvent, VehicleId, VehicleStatus, VehicleUpdate};
use crate::vehicles::VehiclePatch;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of a successful ingest.
#[derive(Clone, Debug)]
pub struct IngestReport {
    pub event: DiffEvent,
    /// Range corrections made while applying. Empty for clean updates.
    pub anomalies: Vec<Anomaly>,
}

impl IngestReport {
    pub fn is_anomalous(&self) -> bool {
        !self.anomalies.is_empty()
    }
}

/// Validates updates and keeps data-quality counters.
#[derive(Default)]
pub struct UpdateIngestor {
    rejected: AtomicU64,
    anomalies: AtomicU64,
}

impl UpdateIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one JSON record from a feed.
    pub fn parse(&self, bytes: &[u8]) -> Result<VehicleUpdate> {
        serde_json::from_slice(bytes).map_err(|e| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "rejected malformed feed record");
            FleetError::InvalidUpdate(format!("malformed record: {}", e))
        })
    }

    /// Check an update and convert it into a patch.
    ///
    /// Fails with [`FleetError::InvalidUpdate`] if the identifier is missing
    /// or blank, or the status is not one of the known values.
    pub fn validate(&self, update: &VehicleUpdate) -> Result<VehiclePatch> {
        self.validate_inner(update).map_err(|e| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                identifier = update.identifier.as_deref().unwrap_or(""),
                error = %e,
                "rejected vehicle update"
            );
            e
        })
    }

    fn validate_inner(&self, update: &VehicleUpdate) -> Result<VehiclePatch> {
        let id = match update.identifier.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => VehicleId::new(id),
            Some(_) => return Err(FleetError::InvalidUpdate("identifier is empty".into())),
            None => return Err(FleetError::InvalidUpdate("identifier is missing".into())),
        };

        let status = match update.status {
            Some(ref raw) => Some(
                raw.parse::<VehicleStatus>()
                    .map_err(FleetError::InvalidUpdate)?,
            ),
            None => None,
        };

        Ok(VehiclePatch {
            id,
            route_number: update.route_number.clone(),
            from: update.from.clone(),
            to: update.to.clone(),
            current_stop: update.current_stop.clone(),
            next_stop: update.next_stop.clone(),
            status,
            eta: update.eta.clone(),
            current_passengers: update.current_passengers,
            capacity: update.capacity,
        })
    }

    /// Log and count corrections made by the store.
    pub(crate) fn record_anomalies(&self, anomalies: &[Anomaly]) {
        for anomaly in anomalies {
            tracing::warn!(
                id = %anomaly.id,
                field = ?anomaly.field,
                reported = anomaly.reported,
                stored = anomaly.stored,
                "clamped out-of-range value"
            );
        }
        self.anomalies
            .fetch_add(anomalies.len() as u64, Ordering::Relaxed);
    }

    /// Count a rejection that happened after validation (e.g. reject policy).
    pub(crate) fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Values clamped so far.
    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }
}
