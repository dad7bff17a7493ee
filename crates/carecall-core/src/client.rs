//! Long-lived call client: one shared signaling link, one active call.

use std::sync::Arc;

use carecall_common::config::{AppConfig, BusyPolicy};
use carecall_common::{
    CallError, EventKind, IceServerConfig, SessionDescription, SignalEvent, TransportError,
};
use carecall_signaling::{
    ConnectionState, Credentials, Ready, SignalingTransport, Subscription, TransportEvent,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::ChatStore;
use crate::facade::CallHandle;
use crate::inbox::{CandidateInbox, INBOX_EVENTS, InboxWorker};
use crate::machine::{self, CallSetup, MachineContext, Start};
use crate::media::{MediaBackend, MediaKind};
use crate::session::{CallOutcome, EndReason};

/// Per-call tunables, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub ring_timeout_secs: u32,
    pub ice_servers: Vec<IceServerConfig>,
    pub busy_policy: BusyPolicy,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 30,
            ice_servers: IceServerConfig::defaults(),
            busy_policy: BusyPolicy::Ignore,
        }
    }
}

impl From<&AppConfig> for CallSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            ring_timeout_secs: cfg.call.ring_timeout_secs,
            ice_servers: IceServerConfig::from_config(&cfg.ice),
            busy_policy: cfg.call.busy_policy,
        }
    }
}

/// Request to call someone about an appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingCall {
    pub appointment_id: String,
    pub remote_party_id: String,
    pub media_kind: MediaKind,
}

/// A call announced by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub call_id: String,
    pub caller: String,
    pub appointment_id: String,
    pub offer: SessionDescription,
    pub is_video_call: bool,
}

impl IncomingCall {
    pub fn from_event(event: SignalEvent) -> Option<Self> {
        match event {
            SignalEvent::IncomingCall {
                call_id,
                caller,
                appointment_id,
                offer,
                is_video_call,
            } => Some(Self {
                call_id,
                caller,
                appointment_id,
                offer,
                is_video_call,
            }),
            _ => None,
        }
    }

    /// Video if the caller asked for it or offered a video section.
    pub fn media_kind(&self) -> MediaKind {
        MediaKind::from_video(self.is_video_call || self.offer.has_video())
    }
}

struct ActiveCall {
    handle: CallHandle,
    task: JoinHandle<CallOutcome>,
}

impl ActiveCall {
    fn is_running(&self) -> bool {
        !self.handle.status().is_terminal()
    }

    /// End the call and wait until its task has released everything.
    async fn force_end(self, reason: EndReason) {
        if self.is_running() {
            self.handle.end_with(reason);
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Call task aborted");
        }
    }
}

/// Owns the shared signaling link and the single active call.
pub struct CallClient {
    transport: Arc<dyn SignalingTransport>,
    media: MediaBackend,
    chat: Arc<dyn ChatStore>,
    settings: CallSettings,
    identity: Mutex<Option<Ready>>,
    active: Mutex<Option<ActiveCall>>,
    /// The latest call's handle, readable without the slot lock.
    presence: watch::Sender<Option<CallHandle>>,
    inbox: CandidateInbox,
    inbox_worker: Mutex<Option<InboxWorker>>,
}

impl CallClient {
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        media: MediaBackend,
        chat: Arc<dyn ChatStore>,
        settings: CallSettings,
    ) -> Self {
        let (presence, _) = watch::channel(None);
        let (inbox, worker) = CandidateInbox::new();
        Self {
            transport,
            media,
            chat,
            settings,
            identity: Mutex::new(None),
            active: Mutex::new(None),
            presence,
            inbox,
            inbox_worker: Mutex::new(Some(worker)),
        }
    }

    pub fn settings(&self) -> &CallSettings {
        &self.settings
    }

    /// Connect the shared link. Calling it again while connected is cheap.
    pub async fn connect(&self, credentials: &Credentials) -> Result<Ready, CallError> {
        // Subscribed before the handshake so no early announcement slips by.
        let mut worker = self.inbox_worker.lock().await;
        let inbox_events = worker
            .is_some()
            .then(|| self.transport.subscribe().only(INBOX_EVENTS));

        let ready = self.transport.connect(credentials).await?;
        info!(session = %ready.session_id, user = ?ready.user_id, "Call client connected");
        *self.identity.lock().await = Some(ready.clone());
        if let (Some(worker), Some(events)) = (worker.take(), inbox_events) {
            tokio::spawn(worker.run(events));
        }
        Ok(ready)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.connection_state()
    }

    /// Start an outgoing call, ending any call already in progress first.
    pub async fn start_outgoing(&self, request: OutgoingCall) -> Result<CallHandle, CallError> {
        let setup = CallSetup {
            appointment_id: request.appointment_id,
            local_party_id: self.local_party_id().await,
            remote_party_id: request.remote_party_id,
            media_kind: request.media_kind,
            start: Start::Outgoing,
        };
        self.launch(setup).await
    }

    /// Answer `call`, ending any call already in progress first.
    pub async fn accept_incoming(&self, call: IncomingCall) -> Result<CallHandle, CallError> {
        let media_kind = call.media_kind();
        let setup = CallSetup {
            appointment_id: call.appointment_id,
            local_party_id: self.local_party_id().await,
            remote_party_id: call.caller,
            media_kind,
            start: Start::Incoming {
                candidates: self.inbox.claim(&call.call_id),
                call_id: call.call_id,
                offer: call.offer,
            },
        };
        self.launch(setup).await
    }

    pub async fn reject_incoming(&self, call: &IncomingCall) -> Result<(), CallError> {
        info!(call = %call.call_id, caller = %call.caller, "Rejecting incoming call");
        self.inbox.forget(&call.call_id);
        self.transport
            .send(SignalEvent::RejectCall {
                call_id: call.call_id.clone(),
            })
            .await?;
        Ok(())
    }

    /// Listen for incoming calls on the shared link.
    pub fn incoming_calls(&self) -> IncomingCallListener {
        IncomingCallListener {
            events: self
                .transport
                .subscribe()
                .only(&[EventKind::IncomingCall, EventKind::CallCancelled]),
            transport: Arc::clone(&self.transport),
            presence: self.presence.subscribe(),
            inbox: self.inbox.clone(),
            busy_policy: self.settings.busy_policy,
        }
    }

    /// The call in progress, if any.
    pub fn active_call(&self) -> Option<CallHandle> {
        self.presence
            .borrow()
            .as_ref()
            .filter(|call| !call.status().is_terminal())
            .cloned()
    }

    /// End any call and close the link.
    pub async fn shutdown(&self) {
        if let Some(call) = self.active.lock().await.take() {
            call.force_end(EndReason::LocalHangup).await;
        }
        self.transport.disconnect().await;
        *self.identity.lock().await = None;
        info!("Call client shut down");
    }

    async fn launch(&self, setup: CallSetup) -> Result<CallHandle, CallError> {
        // The previous handle stays published while it winds down, so the
        // listener keeps treating the client as busy.
        let mut slot = self.active.lock().await;
        if let Some(previous) = slot.take() {
            info!("Ending the current call before starting a new one");
            previous.force_end(EndReason::Superseded).await;
        }

        if self.transport.connection_state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected.into());
        }

        let ctx = MachineContext {
            transport: Arc::clone(&self.transport),
            media: self.media.clone(),
            chat: Arc::clone(&self.chat),
            settings: self.settings.clone(),
        };
        let (handle, task) = machine::spawn(ctx, setup);
        self.presence.send_replace(Some(handle.clone()));
        *slot = Some(ActiveCall {
            handle: handle.clone(),
            task,
        });
        Ok(handle)
    }

    async fn local_party_id(&self) -> String {
        self.identity
            .lock()
            .await
            .as_ref()
            .map(|ready| ready.user_id.clone().unwrap_or_else(|| ready.session_id.clone()))
            .unwrap_or_default()
    }
}

/// What the incoming-call listener yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingEvent {
    Incoming(IncomingCall),
    /// The caller gave up before the call was answered.
    Withdrawn {
        call_id: Option<String>,
        reason: Option<String>,
    },
    /// The shared link dropped. Calls announced before this are gone; new
    /// ones follow once the client reconnects.
    LinkLost { reason: String },
}

/// Incoming calls on the shared link, with the busy policy applied.
pub struct IncomingCallListener {
    events: Subscription,
    transport: Arc<dyn SignalingTransport>,
    presence: watch::Receiver<Option<CallHandle>>,
    inbox: CandidateInbox,
    busy_policy: BusyPolicy,
}

impl IncomingCallListener {
    /// Next incoming call, withdrawal or link loss. `None` only once the
    /// transport itself has been dropped.
    pub async fn next(&mut self) -> Option<IncomingEvent> {
        loop {
            let event = match self.events.recv().await? {
                TransportEvent::Signal(event) => event,
                TransportEvent::Disconnected { reason } => {
                    debug!(%reason, "Incoming-call listener saw the link drop");
                    return Some(IncomingEvent::LinkLost { reason });
                }
            };

            match event {
                SignalEvent::IncomingCall { .. } => {
                    let Some(call) = IncomingCall::from_event(event) else {
                        continue;
                    };
                    if self.busy().is_some() {
                        self.inbox.forget(&call.call_id);
                        self.handle_busy(&call).await;
                        continue;
                    }
                    info!(
                        call = %call.call_id,
                        caller = %call.caller,
                        video = call.is_video_call,
                        "Incoming call"
                    );
                    return Some(IncomingEvent::Incoming(call));
                }
                SignalEvent::CallCancelled { call_id, reason } => {
                    // The active call handles its own cancellation.
                    if let Some(active_id) = self.busy() {
                        if call_id.is_none() || call_id == active_id {
                            continue;
                        }
                    }
                    return Some(IncomingEvent::Withdrawn { call_id, reason });
                }
                _ => continue,
            }
        }
    }

    /// `Some(call id)` while a call is running.
    fn busy(&self) -> Option<Option<String>> {
        self.presence
            .borrow()
            .as_ref()
            .filter(|call| !call.status().is_terminal())
            .map(|call| call.snapshot().session_id)
    }

    async fn handle_busy(&self, call: &IncomingCall) {
        match self.busy_policy {
            BusyPolicy::Ignore => {
                info!(call = %call.call_id, caller = %call.caller, "Busy; incoming call ignored");
            }
            BusyPolicy::Reject => {
                info!(call = %call.call_id, caller = %call.caller, "Busy; rejecting incoming call");
                let reject = SignalEvent::RejectCall {
                    call_id: call.call_id.clone(),
                };
                if let Err(e) = self.transport.send(reject).await {
                    warn!(error = %e, "rejectCall not sent");
                }
            }
        }
    }
}
