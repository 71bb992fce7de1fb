//! Seam between the control loop and the physical link.
//!
//! The service talks to the desk only through [`DeskTransport`]. Telemetry
//! flows back the other way as [`TransportEvent`]s on a channel handed to
//! [`DeskTransport::connect`], so the control loop consumes notifications in
//! its own task instead of having them mutate state from inside the BLE
//! stack's callback context.

use crate::{
    error::{ConnectError, WriteError},
    protocol::{Command, HeightSample},
};
use async_trait::async_trait;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::sync::mpsc;

/// Identifies one established link
///
/// Every successful connect gets a new id, so events still in flight from a
/// previous link can be told apart and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    /// Wrap a raw id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Hands out increasing [`LinkId`]s
#[derive(Debug, Default)]
pub struct LinkIds(AtomicU64);

impl LinkIds {
    /// Create a new allocator starting at 1
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Allocate the next id
    pub fn next(&self) -> LinkId {
        LinkId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Result of a successful connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected {
    /// Id of the new link
    pub link: LinkId,
    /// Height read right after subscribing
    pub height_mm: i32,
}

/// What happened on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The desk reported its height
    Height(HeightSample),
    /// The link dropped without us asking
    Disconnected,
}

/// Event delivered from the transport to the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportEvent {
    /// Link the event belongs to
    pub link: LinkId,
    /// What happened
    pub kind: LinkEvent,
}

impl TransportEvent {
    /// Height notification on `link`
    #[must_use]
    pub const fn height(link: LinkId, sample: HeightSample) -> Self {
        Self {
            link,
            kind: LinkEvent::Height(sample),
        }
    }

    /// Unexpected disconnect of `link`
    #[must_use]
    pub const fn disconnected(link: LinkId) -> Self {
        Self {
            link,
            kind: LinkEvent::Disconnected,
        }
    }
}

/// Sending half of the transport event channel
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of the transport event channel
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// A link to one desk
///
/// Implementations never retry on their own and never reconnect in the
/// background; the service decides when to try again.
#[async_trait]
pub trait DeskTransport: Send + Sync + 'static {
    /// Establish the link and subscribe to height notifications
    ///
    /// Any previous link is released first. Notifications and disconnects for
    /// the new link are sent on `events` tagged with the returned [`LinkId`].
    async fn connect(&self, events: EventSender) -> Result<Connected, ConnectError>;

    /// Write one command
    ///
    /// Fails with [`WriteError::NotConnected`] if there is no link.
    async fn write_command(&self, command: Command) -> Result<(), WriteError>;

    /// Release the link; calling it without a link is a no-op
    async fn disconnect(&self);
}
