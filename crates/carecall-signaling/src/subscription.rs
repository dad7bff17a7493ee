//! Typed event subscriptions over a link's broadcast fan-out.

use carecall_common::{EventKind, SignalEvent};
use tokio::sync::broadcast;
use tracing::warn;

/// What a subscriber receives from the link.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// An event from the relay, in receipt order.
    Signal(SignalEvent),
    /// The link went away. No further signals follow until a reconnect.
    Disconnected { reason: String },
}

/// A receiver of link events, optionally narrowed to some event kinds.
///
/// `Disconnected` is always delivered regardless of the filter.
pub struct Subscription {
    rx: broadcast::Receiver<TransportEvent>,
    kinds: Option<Vec<EventKind>>,
}

impl Subscription {
    pub(crate) fn new(rx: broadcast::Receiver<TransportEvent>) -> Self {
        Self { rx, kinds: None }
    }

    /// Only deliver signals of the given kinds.
    pub fn only(mut self, kinds: &[EventKind]) -> Self {
        self.kinds = Some(kinds.to_vec());
        self
    }

    fn wants(&self, event: &TransportEvent) -> bool {
        match (event, &self.kinds) {
            (TransportEvent::Signal(signal), Some(kinds)) => kinds.contains(&signal.kind()),
            _ => true,
        }
    }

    /// Next event, or `None` once the link itself has been dropped.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Signaling subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
