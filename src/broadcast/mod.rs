//! Fan-out of diff events to live subscribers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits on a
//! subscriber: one that cannot keep up is disconnected instead.
//!
//! # Example
//!
//! ```ignore
//! let subscription = fleet.subscribe()?;
//! let mut view = subscription.snapshot;
//!
//! for event in subscription.handle.iter() {
//!     view.apply(&event)?;
//! }
//! // Closed: check subscription.handle.close_reason()
//! ```

mod hub;
mod types;

pub use hub::BroadcastHub;
pub use types::{CloseReason, SubscriberConfig, SubscriberHandle, SubscriberId, SubscriberState};
