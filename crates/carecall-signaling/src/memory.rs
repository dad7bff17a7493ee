//! In-process relay link.
//!
//! Behaves like [`WsTransport`](crate::WsTransport) from the caller's side but
//! never touches the network: everything the client sends lands in a
//! [`RelayProbe`], and the probe injects the relay's side of the conversation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carecall_common::{EventKind, SignalEvent, TransportError};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::debug;

use crate::{
    ConnectionState, Credentials, EVENT_BUFFER, Ready, SignalingTransport, Subscription,
    TransportEvent,
};

pub struct MemoryTransport {
    shared: Arc<MemShared>,
}

struct MemShared {
    events: broadcast::Sender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    sent: mpsc::UnboundedSender<SignalEvent>,
    inner: Mutex<MemInner>,
}

#[derive(Default)]
struct MemInner {
    ready: Option<Ready>,
    expected_token: Option<String>,
    connects: usize,
    next_failure: Option<TransportError>,
}

/// The relay's end of a [`MemoryTransport`].
pub struct RelayProbe {
    shared: Arc<MemShared>,
    sent: mpsc::UnboundedReceiver<SignalEvent>,
}

impl MemoryTransport {
    /// A link that accepts any token, and the relay end that drives it.
    pub fn pair() -> (Self, RelayProbe) {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MemShared {
            events,
            state,
            sent: sent_tx,
            inner: Mutex::new(MemInner::default()),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            RelayProbe {
                shared,
                sent: sent_rx,
            },
        )
    }

    /// A link that only accepts `token`.
    pub fn with_token(token: impl Into<String>) -> (Self, RelayProbe) {
        let (transport, probe) = Self::pair();
        if let Ok(mut inner) = transport.shared.inner.try_lock() {
            inner.expected_token = Some(token.into());
        }
        (transport, probe)
    }
}

#[async_trait]
impl SignalingTransport for MemoryTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<Ready, TransportError> {
        let mut inner = self.shared.inner.lock().await;
        if let Some(ready) = &inner.ready {
            return Ok(ready.clone());
        }

        self.shared.state.send_replace(ConnectionState::Connecting);
        if let Some(err) = inner.next_failure.take() {
            self.shared.state.send_replace(ConnectionState::Disconnected);
            return Err(err);
        }
        if inner
            .expected_token
            .as_ref()
            .is_some_and(|t| *t != credentials.token)
        {
            self.shared.state.send_replace(ConnectionState::Disconnected);
            return Err(TransportError::AuthRejected("invalid token".into()));
        }

        inner.connects += 1;
        let ready = Ready {
            session_id: format!("mem-{}", inner.connects),
            user_id: None,
        };
        inner.ready = Some(ready.clone());
        self.shared.state.send_replace(ConnectionState::Connected);
        Ok(ready)
    }

    async fn send(&self, event: SignalEvent) -> Result<(), TransportError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        debug!(event = %event.kind(), "Signal sent (memory)");
        self.shared
            .sent
            .send(event)
            .map_err(|_| TransportError::Closed("relay probe dropped".into()))
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.shared.events.subscribe())
    }

    async fn disconnect(&self) {
        self.shared.drop_link("closed by client").await;
    }

    fn connection_state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }
}

impl MemShared {
    async fn drop_link(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        if inner.ready.take().is_some() {
            self.state.send_replace(ConnectionState::Disconnected);
            let _ = self.events.send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }
}

impl RelayProbe {
    /// Deliver an event to every subscriber as if the relay sent it.
    pub fn push(&self, event: SignalEvent) {
        let _ = self.shared.events.send(TransportEvent::Signal(event));
    }

    /// Drop the link from the relay side.
    pub async fn sever(&self, reason: &str) {
        self.shared.drop_link(reason).await;
    }

    /// Make the next `connect` fail with `err`.
    pub async fn fail_next_connect(&self, err: TransportError) {
        self.shared.inner.lock().await.next_failure = Some(err);
    }

    /// Number of successful handshakes so far.
    pub async fn connect_count(&self) -> usize {
        self.shared.inner.lock().await.connects
    }

    /// Next event the client sent, waiting for it.
    pub async fn next_sent(&mut self) -> Option<SignalEvent> {
        self.sent.recv().await
    }

    /// Next sent event of `kind`, skipping others. Gives up after `within`.
    pub async fn expect_sent(
        &mut self,
        kind: EventKind,
        within: Duration,
    ) -> Option<SignalEvent> {
        tokio::time::timeout(within, async {
            while let Some(event) = self.sent.recv().await {
                if event.kind() == kind {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Everything sent so far that has not been consumed.
    pub fn drain_sent(&mut self) -> Vec<SignalEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.sent.try_recv() {
            out.push(event);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_connect_is_a_noop() {
        let (link, probe) = MemoryTransport::pair();
        let first = link.connect(&Credentials::bearer("t")).await.unwrap();
        let second = link.connect(&Credentials::bearer("t")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(probe.connect_count().await, 1);
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let (link, _probe) = MemoryTransport::with_token("good");
        let err = link.connect(&Credentials::bearer("bad")).await.unwrap_err();
        assert!(matches!(err, TransportError::AuthRejected(_)));
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_requires_a_link() {
        let (link, _probe) = MemoryTransport::pair();
        let err = link
            .send(SignalEvent::Join {
                appointment_id: "apt".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
    }

    #[tokio::test]
    async fn sever_notifies_subscribers() {
        let (link, probe) = MemoryTransport::pair();
        link.connect(&Credentials::bearer("t")).await.unwrap();
        let mut sub = link.subscribe();

        probe.push(SignalEvent::CallRinging {
            call_id: "c1".into(),
        });
        probe.sever("relay restart").await;

        assert_eq!(
            sub.recv().await,
            Some(TransportEvent::Signal(SignalEvent::CallRinging {
                call_id: "c1".into()
            }))
        );
        assert_eq!(
            sub.recv().await,
            Some(TransportEvent::Disconnected {
                reason: "relay restart".into()
            })
        );
        assert_eq!(link.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn next_sent_waits_for_the_client() {
        let (link, mut probe) = MemoryTransport::pair();
        link.connect(&Credentials::bearer("t")).await.unwrap();
        let sender = tokio::spawn(async move {
            tokio::task::yield_now().await;
            link.send(SignalEvent::Join {
                appointment_id: "apt".into(),
            })
            .await
        });
        assert_eq!(
            probe.next_sent().await,
            Some(SignalEvent::Join {
                appointment_id: "apt".into()
            })
        );
        sender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn sent_events_reach_the_relay_in_order() {
        let (link, mut probe) = MemoryTransport::pair();
        link.connect(&Credentials::bearer("t")).await.unwrap();
        for id in ["a", "b", "c"] {
            link.send(SignalEvent::RejectCall { call_id: id.into() })
                .await
                .unwrap();
        }
        let ids: Vec<_> = probe
            .drain_sent()
            .iter()
            .filter_map(|e| e.call_id().map(str::to_owned))
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }
}
