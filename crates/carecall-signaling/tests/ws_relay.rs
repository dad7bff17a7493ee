//! WebSocket transport against a small in-test relay.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::Response,
    routing::get,
};
use carecall_common::{EventKind, SessionDescription, SignalEvent, TransportError};
use carecall_signaling::{
    ConnectionState, Credentials, SignalingTransport, TransportEvent, WsTransport,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;

const GOOD_TOKEN: &str = "letmein";

#[derive(Default)]
struct Relay {
    sockets: AtomicUsize,
}

async fn ws_handler(ws: WebSocketUpgrade, State(relay): State<Arc<Relay>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let n = relay.sockets.fetch_add(1, Ordering::SeqCst) + 1;
    let (mut sender, mut receiver) = socket.split();

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(event) = SignalEvent::decode(text.as_str()) else {
            continue;
        };
        let reply = match event {
            SignalEvent::Identify { token } if token == GOOD_TOKEN => SignalEvent::Ready {
                session_id: format!("sess-{n}"),
                user_id: Some("dr-1".into()),
            },
            SignalEvent::Identify { .. } => SignalEvent::AuthError {
                message: Some("bad token".into()),
            },
            SignalEvent::Join { appointment_id } if appointment_id == "closing" => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "maintenance".into(),
                    })))
                    .await;
                return;
            }
            SignalEvent::Join { appointment_id } => SignalEvent::JoinedCall {
                appointment_id: Some(appointment_id),
            },
            SignalEvent::Call { .. } => SignalEvent::CallRinging {
                call_id: "c1".into(),
            },
            _ => continue,
        };
        let text = reply.encode().unwrap();
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
}

async fn spawn_relay() -> (String, Arc<Relay>) {
    let relay = Arc::new(Relay::default());
    let app = Router::new()
        .route("/signal", get(ws_handler))
        .with_state(Arc::clone(&relay));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}/signal"), relay)
}

async fn next_signal(events: &mut carecall_signaling::Subscription) -> SignalEvent {
    match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
        Ok(Some(TransportEvent::Signal(event))) => event,
        other => panic!("expected a signal, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_join_and_call() {
    let (url, _relay) = spawn_relay().await;
    let link = WsTransport::new(url, Duration::from_secs(5));
    let mut events = link.subscribe();

    let ready = link.connect(&Credentials::bearer(GOOD_TOKEN)).await.unwrap();
    assert_eq!(ready.user_id.as_deref(), Some("dr-1"));
    assert_eq!(link.connection_state(), ConnectionState::Connected);

    link.send(SignalEvent::Join {
        appointment_id: "apt-1".into(),
    })
    .await
    .unwrap();
    assert_eq!(
        next_signal(&mut events).await,
        SignalEvent::JoinedCall {
            appointment_id: Some("apt-1".into())
        }
    );

    link.send(SignalEvent::Call {
        appointment_id: "apt-1".into(),
        receiver: "pat-9".into(),
        offer: SessionDescription::offer("v=0"),
        call_id: "proposed".into(),
    })
    .await
    .unwrap();
    assert_eq!(next_signal(&mut events).await.kind(), EventKind::CallRinging);

    link.disconnect().await;
    assert_eq!(link.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn second_connect_reuses_the_socket() {
    let (url, relay) = spawn_relay().await;
    let link = WsTransport::new(url, Duration::from_secs(5));

    let first = link.connect(&Credentials::bearer(GOOD_TOKEN)).await.unwrap();
    let second = link.connect(&Credentials::bearer(GOOD_TOKEN)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(relay.sockets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_connects_open_one_socket() {
    let (url, relay) = spawn_relay().await;
    let link = Arc::new(WsTransport::new(url, Duration::from_secs(5)));
    let creds = Credentials::bearer(GOOD_TOKEN);

    let (a, b) = tokio::join!(link.connect(&creds), link.connect(&creds));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(relay.sockets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let (url, _relay) = spawn_relay().await;
    let link = WsTransport::new(url, Duration::from_secs(5));

    let err = link.connect(&Credentials::bearer("nope")).await.unwrap_err();
    assert_eq!(err, TransportError::AuthRejected("bad token".into()));
    assert!(!err.is_retryable());
    assert_eq!(link.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn relay_close_is_reported_to_subscribers() {
    let (url, _relay) = spawn_relay().await;
    let link = WsTransport::new(url, Duration::from_secs(5));
    let mut events = link.subscribe();
    let mut state = link.watch_state();
    link.connect(&Credentials::bearer(GOOD_TOKEN)).await.unwrap();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

    link.send(SignalEvent::Join {
        appointment_id: "closing".into(),
    })
    .await
    .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap();
    assert_eq!(
        event,
        Some(TransportEvent::Disconnected {
            reason: "maintenance".into()
        })
    );
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(link.connection_state(), ConnectionState::Disconnected);

    let err = link
        .send(SignalEvent::Join {
            appointment_id: "apt-1".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::NotConnected);
}

#[tokio::test]
async fn refused_port_is_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let link = WsTransport::new(format!("ws://{addr}/signal"), Duration::from_secs(5));
    let err = link.connect(&Credentials::bearer(GOOD_TOKEN)).await.unwrap_err();
    assert!(matches!(err, TransportError::NetworkUnreachable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn silent_relay_times_out() {
    // Accepts TCP but never answers the upgrade.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let link = WsTransport::new(format!("ws://{addr}/signal"), Duration::from_millis(200));
    let err = link.connect(&Credentials::bearer(GOOD_TOKEN)).await.unwrap_err();
    assert_eq!(err, TransportError::Timeout);
    assert_eq!(link.connection_state(), ConnectionState::Disconnected);
}
