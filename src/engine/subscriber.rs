//! Subscriber handles: the push side of a live connection.
//!
//! The workspace only ever talks to a subscriber through this trait. Pushes
//! must not block, since they run while the workspace holds its connection
//! lock; transports that do real I/O put a queue in between, as
//! [`ChannelSubscriber`] does.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::model::Frame;

/// Identifies one registered subscriber within a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A live push channel to one client.
pub trait Subscriber: Send + Sync {
    /// Queue one frame for delivery without blocking.
    fn send(&self, frame: &Frame) -> Result<(), DeliveryError>;

    /// Tell the remote side we are done. Must be safe to call more than once.
    fn close(&self);
}

/// What a [`ChannelSubscriber`] hands to the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Close,
}

/// Subscriber backed by a bounded channel. The receiving half is drained by
/// whatever task owns the real socket; dropping it marks the subscriber
/// closed on the next push.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Outbound>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn send(&self, frame: &Frame) -> Result<(), DeliveryError> {
        self.tx
            .try_send(Outbound::Frame(frame.clone()))
            .map_err(|e| match e {
                TrySendError::Closed(_) => DeliveryError::Closed,
                TrySendError::Full(_) => {
                    DeliveryError::Transient("subscriber queue is full".to_string())
                }
            })
    }

    fn close(&self) {
        // Receiver may already be gone; nothing left to tell it then.
        let _ = self.tx.try_send(Outbound::Close);
    }
}
