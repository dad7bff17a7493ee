//! WebSocket signaling link to the call relay.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use carecall_common::config::SignalingConfig;
use carecall_common::{SignalEvent, TransportError};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::{
    ConnectionState, Credentials, EVENT_BUFFER, Ready, SignalingTransport, Subscription,
    TransportEvent,
};

/// Authenticated WebSocket link with keepalive pings.
///
/// ```rust,no_run
/// use carecall_signaling::{Credentials, SignalingTransport, WsTransport};
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), carecall_common::TransportError> {
/// let link = WsTransport::new("ws://localhost:5000/signal", Duration::from_secs(10));
/// let mut events = link.subscribe();
/// link.connect(&Credentials::bearer("token")).await?;
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
    heartbeat_interval: Duration,
    events: broadcast::Sender<TransportEvent>,
    /// Serializes connect attempts so only one socket is ever opened.
    connect_lock: Mutex<()>,
    shared: Arc<Shared>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
}

/// One live socket: its handshake result, writer queue and I/O tasks.
struct Link {
    generation: u64,
    ready: Ready,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Shared {
    /// Forget the link after its socket died. Returns false if the link was
    /// already replaced or closed locally.
    async fn mark_lost(&self, generation: u64) -> bool {
        let mut link = self.link.lock().await;
        if link.as_ref().is_some_and(|l| l.generation == generation) {
            if let Some(l) = link.take() {
                l.writer.abort();
            }
            self.state.send_replace(ConnectionState::Disconnected);
            true
        } else {
            false
        }
    }
}

impl WsTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: url.into(),
            connect_timeout,
            heartbeat_interval: Duration::from_secs(25),
            events,
            connect_lock: Mutex::new(()),
            shared: Arc::new(Shared {
                state,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(cfg: &SignalingConfig) -> Self {
        Self::new(cfg.url.clone(), cfg.connect_timeout())
            .with_heartbeat_interval(cfg.heartbeat_interval())
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Open the socket, authenticate and spawn the I/O tasks.
    async fn open(&self, credentials: &Credentials) -> Result<Link, TransportError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(classify_connect_error)?;
        let (mut sink, mut stream) = ws.split();

        let identify = SignalEvent::Identify {
            token: credentials.token.clone(),
        }
        .encode()?;
        sink.send(Message::Text(identify.into()))
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))?;

        // Wait for the relay's verdict; anything else before it is noise.
        let ready = loop {
            let msg = match stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(TransportError::Closed(e.to_string())),
                None => {
                    return Err(TransportError::Closed(
                        "relay closed the socket during authentication".into(),
                    ));
                }
            };
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .unwrap_or_else(|| "closed during authentication".into());
                    return Err(TransportError::Closed(reason));
                }
                _ => continue,
            };
            match SignalEvent::decode(text.as_str()) {
                Ok(SignalEvent::Ready {
                    session_id,
                    user_id,
                }) => break Ready {
                    session_id,
                    user_id,
                },
                Ok(SignalEvent::AuthError { message }) => {
                    return Err(TransportError::AuthRejected(
                        message.unwrap_or_else(|| "invalid token".into()),
                    ));
                }
                Ok(other) => debug!(event = %other.kind(), "Ignoring event before ready"),
                Err(e) => warn!(error = %e, "Skipping undecodable frame during handshake"),
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;

        // Writer: outbound queue plus keepalive pings.
        let (outbound, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let heartbeat = self.heartbeat_interval;
        let writer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            ticker.tick().await;
            loop {
                tokio::select! {
                    msg = out_rx.recv() => match msg {
                        Some(msg) => {
                            let closing = matches!(msg, Message::Close(_));
                            if sink.send(msg).await.is_err() || closing {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        if sink.send(Message::Ping(Default::default())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Reader: decode frames and fan them out in receipt order.
        let events = self.events.clone();
        let shared = Arc::clone(&self.shared);
        let reader = tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => match SignalEvent::decode(text.as_str()) {
                        Ok(event) => {
                            debug!(event = %event.kind(), "Signal received");
                            let _ = events.send(TransportEvent::Signal(event));
                        }
                        Err(e) => warn!(error = %e, "Skipping undecodable signaling frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by relay".into());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break e.to_string(),
                    None => break "connection reset".to_string(),
                }
            };
            if shared.mark_lost(generation).await {
                warn!(%reason, "Signaling link lost");
                let _ = events.send(TransportEvent::Disconnected { reason });
            }
        });

        Ok(Link {
            generation,
            ready,
            outbound,
            reader,
            writer,
        })
    }
}

#[async_trait]
impl SignalingTransport for WsTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<Ready, TransportError> {
        let _guard = self.connect_lock.lock().await;

        if let Some(link) = self.shared.link.lock().await.as_ref() {
            return Ok(link.ready.clone());
        }

        self.shared.state.send_replace(ConnectionState::Connecting);
        let attempt = timeout(self.connect_timeout, self.open(credentials)).await;
        let result = match attempt {
            Ok(Ok(link)) => {
                let ready = link.ready.clone();
                *self.shared.link.lock().await = Some(link);
                self.shared.state.send_replace(ConnectionState::Connected);
                info!(url = %self.url, session = %ready.session_id, "Signaling link ready");
                Ok(ready)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout),
        };

        if let Err(e) = &result {
            self.shared.state.send_replace(ConnectionState::Disconnected);
            warn!(url = %self.url, error = %e, "Signaling connect failed");
        }
        result
    }

    async fn send(&self, event: SignalEvent) -> Result<(), TransportError> {
        let text = event.encode()?;
        let link = self.shared.link.lock().await;
        let Some(link) = link.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        debug!(event = %event.kind(), "Signal sent");
        link.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::Closed("writer stopped".into()))
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe())
    }

    async fn disconnect(&self) {
        let Some(link) = self.shared.link.lock().await.take() else {
            return;
        };
        // The writer exits right after flushing the close frame.
        let _ = link.outbound.send(Message::Close(None));
        link.reader.abort();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        info!(session = %link.ready.session_id, "Signaling link closed");
        let _ = self.events.send(TransportEvent::Disconnected {
            reason: "closed by client".into(),
        });
    }

    fn connection_state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Ok(mut link) = self.shared.link.try_lock() {
            if let Some(link) = link.take() {
                link.abort();
            }
        }
    }
}

fn classify_connect_error(e: WsError) -> TransportError {
    match e {
        WsError::Http(resp) => {
            let status = resp.status().as_u16();
            if status == 401 || status == 403 {
                TransportError::AuthRejected(format!("relay refused the upgrade ({status})"))
            } else {
                TransportError::NetworkUnreachable(format!("relay answered HTTP {status}"))
            }
        }
        other => TransportError::NetworkUnreachable(other.to_string()),
    }
}
