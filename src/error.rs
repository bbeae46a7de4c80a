//! Error types for the dissemination engine.

use crate::broadcast::SubscriberId;
use crate::types::{Sequence, VehicleId};
use thiserror::Error;

/// Main error type for fleet operations.
///
/// Every variant is scoped to a single update, lookup or subscriber; none of
/// them is fatal to the process.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Vehicle not found: {0}")]
    NotFound(VehicleId),

    #[error("Subscriber {0} dropped: delivery queue overflowed")]
    SubscriberOverflow(SubscriberId),

    #[error("Subscriber {0} is closed")]
    SubscriberClosed(SubscriberId),

    #[error("Sequence gap: expected {expected:?}, got {got:?}")]
    SequenceGap { expected: Sequence, got: Sequence },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid fleet image format: {0}")]
    InvalidFormat(String),

    #[error("Fleet image is locked by another process")]
    Locked,
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        FleetError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for FleetError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        FleetError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for FleetError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        FleetError::Deserialization(e.to_string())
    }
}

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
