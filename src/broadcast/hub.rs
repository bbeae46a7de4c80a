//! Subscriber registry and fan-out of diff events.

use crate::types::{DiffEvent, Sequence};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    CloseReason, SubscriberConfig, SubscriberHandle, SubscriberId, SubscriberState,
    SubscriberStatus,
};

/// Registry entry for one subscriber.
struct Subscriber {
    sender: Sender<DiffEvent>,
    status: Arc<SubscriberStatus>,
    /// Last sequence reflected on the subscriber's side: the snapshot
    /// sequence at activation, then each delivered event.
    position: Sequence,
    /// Last event actually queued (None until the first diff).
    last_sent: Option<Sequence>,
}

impl Subscriber {
    fn is_streaming(&self) -> bool {
        self.status.state() == SubscriberState::Streaming
    }

    /// Queue an event without blocking.
    fn try_send(&mut self, event: &DiffEvent) -> Result<(), CloseReason> {
        match self.sender.try_send(event.clone()) {
            Ok(()) => {
                self.position = event.sequence();
                self.last_sent = Some(event.sequence());
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(CloseReason::Overflow),
            Err(TrySendError::Disconnected(_)) => Err(CloseReason::Disconnected),
        }
    }
}

/// Owns the subscriber registry and delivers events to it.
///
/// The hub does not order events itself: callers must publish in sequence
/// order and must not interleave `activate` with a publish. [`crate::Fleet`]
/// guarantees both by doing every publish and join under its write lock.
pub struct BroadcastHub {
    /// Active subscribers by ID.
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    /// Counter for generating subscriber IDs.
    next_id: AtomicU64,
    /// Subscribers closed because their queue filled up.
    overflow_drops: AtomicU64,
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            overflow_drops: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber in the `Joining` state.
    ///
    /// A joining subscriber receives nothing until [`activate`](Self::activate)
    /// is called with the sequence of the snapshot it was given.
    pub(crate) fn register(&self, config: &SubscriberConfig) -> SubscriberHandle {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let status = SubscriberStatus::joining();

        self.subscribers.write().insert(
            id,
            Subscriber {
                sender,
                status: Arc::clone(&status),
                position: Sequence::default(),
                last_sent: None,
            },
        );

        SubscriberHandle {
            id,
            receiver,
            status,
        }
    }

    /// Start streaming to a joining subscriber. The next event it receives
    /// must be `snapshot_sequence + 1`.
    ///
    /// Returns false if the subscriber is unknown or not joining.
    pub(crate) fn activate(&self, id: SubscriberId, snapshot_sequence: Sequence) -> bool {
        let mut subs = self.subscribers.write();
        match subs.get_mut(&id) {
            Some(sub) if sub.status.start_streaming() => {
                sub.position = snapshot_sequence;
                true
            }
            _ => false,
        }
    }

    /// Remove a subscriber. Idempotent; returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id);
        match removed {
            Some(sub) => {
                sub.status.close(CloseReason::Unsubscribed);
                tracing::debug!(subscriber = %id, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Deliver an event to every streaming subscriber.
    ///
    /// Never blocks: a subscriber whose queue is full is closed with
    /// [`CloseReason::Overflow`], one whose receiver is gone with
    /// [`CloseReason::Disconnected`]. Returns the number of deliveries.
    ///
    /// Only called under the fleet's write lock, with consecutive sequences.
    pub(crate) fn publish(&self, event: &DiffEvent) -> usize {
        let mut delivered = 0;
        let mut to_close = Vec::new();

        {
            let mut subs = self.subscribers.write();
            for (id, sub) in subs.iter_mut() {
                if !sub.is_streaming() {
                    continue;
                }

                // Events at or before the subscriber's snapshot are already
                // reflected there.
                if event.sequence() <= sub.position {
                    continue;
                }
                debug_assert_eq!(event.sequence(), sub.position.next());

                match sub.try_send(event) {
                    Ok(()) => delivered += 1,
                    Err(reason) => to_close.push((*id, reason)),
                }
            }

            // Dropping the entry drops the sender, which disconnects the
            // receiver once it has drained.
            for (id, reason) in &to_close {
                if let Some(sub) = subs.remove(id) {
                    sub.status.close(*reason);
                }
            }
        }

        for (id, reason) in to_close {
            match reason {
                CloseReason::Overflow => {
                    self.overflow_drops.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscriber = %id,
                        seq = event.sequence().0,
                        "subscriber queue overflowed, disconnecting"
                    );
                }
                _ => {
                    tracing::debug!(subscriber = %id, ?reason, "subscriber went away");
                }
            }
        }

        delivered
    }

    /// Get subscriber count (joining and streaming).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether the subscriber is still registered.
    pub fn is_active(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    /// Last event queued to a subscriber, if any.
    pub fn last_sent(&self, id: SubscriberId) -> Option<Sequence> {
        self.subscribers.read().get(&id).and_then(|s| s.last_sent)
    }

    /// Total subscribers dropped for overflow.
    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops.load(Ordering::Relaxed)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
