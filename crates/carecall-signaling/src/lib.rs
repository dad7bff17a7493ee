//! # carecall-signaling
//!
//! The signaling link between a call client and the relay.
//!
//! One authenticated connection per process, shared by the incoming-call
//! listener and whichever call is active. Events are fanned out to any
//! number of typed subscriptions; nothing is delivered through callback slots.
//!
//! Two implementations:
//! - [`WsTransport`]: WebSocket link to a real relay
//! - [`MemoryTransport`]: in-process relay driven through a [`RelayProbe`]

pub mod memory;
pub mod subscription;
pub mod ws;

use async_trait::async_trait;
use carecall_common::{SignalEvent, TransportError};

pub use memory::{MemoryTransport, RelayProbe};
pub use subscription::{Subscription, TransportEvent};
pub use ws::WsTransport;

/// Capacity of the per-link event fan-out.
pub(crate) const EVENT_BUFFER: usize = 256;

/// Credentials presented in the `identify` handshake.
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Handshake result of a successful `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    pub session_id: String,
    pub user_id: Option<String>,
}

/// Lifecycle of a signaling link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Contract every signaling link satisfies.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open and authenticate the link. While already connected this resolves
    /// immediately with the existing [`Ready`].
    async fn connect(&self, credentials: &Credentials) -> Result<Ready, TransportError>;

    /// Send one event to the relay.
    async fn send(&self, event: SignalEvent) -> Result<(), TransportError>;

    /// Subscribe to every relay event from now on.
    fn subscribe(&self) -> Subscription;

    /// Close the link. Subscribers see a final `Disconnected`.
    async fn disconnect(&self);

    fn connection_state(&self) -> ConnectionState;
}
