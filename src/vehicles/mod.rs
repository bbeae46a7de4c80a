//! Vehicle state registry.
//!
//! The store holds the only copy of live vehicle state. Updates are merged
//! field-by-field onto the stored vehicle; every successful mutation takes the
//! next global sequence number.

mod merge;
mod store;

pub use merge::{merge_patch, ClampPolicy, VehiclePatch};
pub use store::{Applied, VehicleStateStore};
