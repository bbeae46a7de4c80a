//! Subscriber types for live fleet updates.

use crate::error::{FleetError, Result};
use crate::types::DiffEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for a subscriber.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Max queued events before the subscriber is dropped.
    /// Default: 1024
    pub buffer_size: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}

/// Unique identifier for a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a subscriber. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberState {
    /// Snapshot captured, registration pending.
    Joining,
    /// Receiving ordered diffs.
    Streaming,
    /// Terminal; nothing more is delivered.
    Closed,
}

/// Why a subscriber was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Delivery queue overflowed (slow consumer).
    Overflow,
    /// Receiving side went away.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// State shared between the hub's registry entry and the transport's handle.
#[derive(Debug)]
pub(crate) struct SubscriberStatus {
    inner: Mutex<(SubscriberState, Option<CloseReason>)>,
}

impl SubscriberStatus {
    pub(crate) fn joining() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new((SubscriberState::Joining, None)),
        })
    }

    pub(crate) fn state(&self) -> SubscriberState {
        self.inner.lock().0
    }

    pub(crate) fn reason(&self) -> Option<CloseReason> {
        self.inner.lock().1
    }

    /// Joining -> Streaming. Returns false if already past joining.
    pub(crate) fn start_streaming(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.0 == SubscriberState::Joining {
            inner.0 = SubscriberState::Streaming;
            true
        } else {
            false
        }
    }

    /// Move to Closed. The first reason recorded sticks.
    pub(crate) fn close(&self, reason: CloseReason) {
        let mut inner = self.inner.lock();
        if inner.0 != SubscriberState::Closed {
            *inner = (SubscriberState::Closed, Some(reason));
        }
    }
}

/// Handle to a subscription, held by the transport layer.
///
/// Events arrive in global sequence order. When the subscriber is closed the
/// hub drops its sending side: queued events can still be drained, after
/// which `recv` reports disconnection.
pub struct SubscriberHandle {
    pub id: SubscriberId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<DiffEvent>,
    pub(crate) status: Arc<SubscriberStatus>,
}

impl SubscriberHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<DiffEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<DiffEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<DiffEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Blocking iterator that ends once the subscriber is closed and drained.
    pub fn iter(&self) -> crossbeam_channel::Iter<'_, DiffEvent> {
        self.receiver.iter()
    }

    /// Everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<DiffEvent> {
        self.receiver.try_iter().collect()
    }

    pub fn state(&self) -> SubscriberState {
        self.status.state()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.status.reason()
    }

    /// Error out if the hub has closed this subscriber.
    pub fn ensure_open(&self) -> Result<()> {
        match self.status.reason() {
            None => Ok(()),
            Some(CloseReason::Overflow) => Err(FleetError::SubscriberOverflow(self.id)),
            Some(_) => Err(FleetError::SubscriberClosed(self.id)),
        }
    }
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.id)
            .field("state", &self.status.state())
            .field("queued", &self.receiver.len())
            .finish()
    }
}
