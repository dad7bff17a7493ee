//! The per-call state machine.
//!
//! Each call runs as one tokio task that owns the [`CallSession`] and
//! processes a single input at a time: UI intents, relay events, peer
//! events, the capture request and the two timers. Nothing else mutates the
//! session; the UI sees it through a `watch` snapshot.

use std::sync::Arc;

use carecall_common::{
    CallError, ChatMessage, EventKind, IceCandidate, MediaError, SessionDescription, SignalEvent,
    TransportError,
};
use carecall_signaling::{SignalingTransport, Subscription, TransportEvent};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::{ChatContent, ChatStore};
use crate::client::CallSettings;
use crate::facade::{CallHandle, Intent, IntentKind, NOTICE_BUFFER, Notice};
use crate::ice_buffer::IceCandidateBuffer;
use crate::inbox::CandidateStream;
use crate::media::{
    IceConnectionState, LocalMediaHandle, MediaBackend, MediaKind, MediaSessionManager,
    PeerEvent, PeerEvents,
};
use crate::session::{CallOutcome, CallSession, CallStatus, Direction, EndReason};
use crate::timer::{DurationTimer, RingTick, RingTimer};

/// Relay events a call cares about. `incomingCall` belongs to the listener.
const CALL_EVENTS: &[EventKind] = &[
    EventKind::JoinedCall,
    EventKind::JoinError,
    EventKind::CallRinging,
    EventKind::CallAccepted,
    EventKind::CallRejected,
    EventKind::CallNotAnswered,
    EventKind::CallCancelled,
    EventKind::CallEnded,
    EventKind::CallError,
    EventKind::AnswerError,
    EventKind::IceCandidate,
    EventKind::ChatMessage,
    EventKind::RecordingStarted,
    EventKind::RecordingStopped,
];

type Acquisition = JoinHandle<Result<LocalMediaHandle, MediaError>>;

/// Long-lived collaborators shared by every call of a client.
#[derive(Clone)]
pub(crate) struct MachineContext {
    pub transport: Arc<dyn SignalingTransport>,
    pub media: MediaBackend,
    pub chat: Arc<dyn ChatStore>,
    pub settings: CallSettings,
}

pub(crate) enum Start {
    Outgoing,
    Incoming {
        call_id: String,
        offer: SessionDescription,
        /// Remote candidates from the moment the call was announced.
        candidates: CandidateStream,
    },
}

pub(crate) struct CallSetup {
    pub appointment_id: String,
    pub local_party_id: String,
    pub remote_party_id: String,
    pub media_kind: MediaKind,
    pub start: Start,
}

/// Negotiation state of the current call.
#[derive(Default)]
struct NegotiationContext {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    candidates: IceCandidateBuffer,
    /// Local candidates produced before the relay assigned a call id.
    outbound_pending: Vec<IceCandidate>,
}

pub(crate) struct CallMachine {
    session: CallSession,
    transport: Arc<dyn SignalingTransport>,
    chat: Arc<dyn ChatStore>,
    settings: CallSettings,
    media: MediaSessionManager,
    events: Subscription,
    remote_candidates: Option<CandidateStream>,
    negotiation: Option<NegotiationContext>,
    /// Our proposal for the call id; the relay's `callRinging` id wins.
    proposed_call_id: String,
    call_sent: bool,
    incoming_offer: Option<SessionDescription>,
    acquisition: Option<Acquisition>,
    peer_events: Option<PeerEvents>,
    ring: Option<RingTimer>,
    clock: Option<DurationTimer>,
    snapshot: watch::Sender<CallSession>,
    notices: broadcast::Sender<Notice>,
}

/// Start a call task. The relay subscription is taken before this returns,
/// so no event sent in reply to the call's first request can be missed.
pub(crate) fn spawn(
    ctx: MachineContext,
    setup: CallSetup,
) -> (CallHandle, JoinHandle<CallOutcome>) {
    let (direction, kinds) = match setup.start {
        Start::Outgoing => (Direction::Outgoing, CALL_EVENTS.to_vec()),
        // Answered calls get their remote candidates from the inbox.
        Start::Incoming { .. } => (
            Direction::Incoming,
            CALL_EVENTS
                .iter()
                .copied()
                .filter(|kind| *kind != EventKind::IceCandidate)
                .collect(),
        ),
    };
    let session = CallSession::new(
        setup.appointment_id,
        setup.local_party_id,
        setup.remote_party_id,
        direction,
        setup.media_kind,
    );

    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(session.clone());
    let (notices, _) = broadcast::channel(NOTICE_BUFFER);

    let mut machine = CallMachine {
        media: MediaSessionManager::new(ctx.media, setup.media_kind),
        events: ctx.transport.subscribe().only(&kinds),
        remote_candidates: None,
        transport: ctx.transport,
        chat: ctx.chat,
        settings: ctx.settings,
        session,
        negotiation: None,
        proposed_call_id: uuid::Uuid::new_v4().to_string(),
        call_sent: false,
        incoming_offer: None,
        acquisition: None,
        peer_events: None,
        ring: None,
        clock: None,
        snapshot: snapshot_tx,
        notices: notices.clone(),
    };

    // The first status is visible to the caller before the task is polled.
    machine.start(setup.start);
    let handle = CallHandle::new(intent_tx, snapshot_rx, notices);
    let task = tokio::spawn(machine.run(intent_rx));
    (handle, task)
}

impl CallMachine {
    async fn run(mut self, mut intents: mpsc::UnboundedReceiver<Intent>) -> CallOutcome {
        loop {
            if let Some(outcome) = &self.session.outcome {
                return outcome.clone();
            }

            tokio::select! {
                biased;

                intent = intents.recv() => match intent {
                    Some(intent) => self.on_intent(intent).await,
                    None => self.end_locally(EndReason::LocalHangup).await,
                },
                event = self.events.recv() => match event {
                    Some(TransportEvent::Signal(event)) => self.on_signal(event).await,
                    Some(TransportEvent::Disconnected { reason }) => {
                        self.fail(TransportError::Closed(reason).into()).await;
                    }
                    None => {
                        self.fail(TransportError::Closed("signaling link dropped".into()).into())
                            .await;
                    }
                },
                candidate = next_remote_candidate(&mut self.remote_candidates) => match candidate {
                    Some(candidate) => self.on_remote_candidate(candidate),
                    None => self.remote_candidates = None,
                },
                acquired = wait_acquisition(&mut self.acquisition) => {
                    self.acquisition = None;
                    self.on_media_acquired(acquired).await;
                }
                event = next_peer_event(&mut self.peer_events) => match event {
                    Some(event) => self.on_peer_event(event).await,
                    None => self.peer_events = None,
                },
                tick = tick_ring(&mut self.ring) => self.on_ring_tick(tick).await,
                elapsed = tick_clock(&mut self.clock) => {
                    self.session.timer.elapsed_secs = Some(elapsed);
                    self.publish();
                }
            }
        }
    }

    fn start(&mut self, start: Start) {
        self.session.started_at = Some(Utc::now());
        match start {
            Start::Outgoing => self.set_status(CallStatus::AcquiringMedia),
            Start::Incoming {
                call_id,
                offer,
                candidates,
            } => {
                self.session.session_id = Some(call_id);
                self.incoming_offer = Some(offer);
                self.remote_candidates = Some(candidates);
                self.set_status(CallStatus::Negotiating);
            }
        }

        let backend = self.media.backend().clone();
        let kind = self.session.media_kind;
        self.acquisition = Some(tokio::spawn(async move {
            backend.acquire_local_media(kind).await
        }));
    }

    // === Media ===

    async fn on_media_acquired(&mut self, result: Result<LocalMediaHandle, MediaError>) {
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => return self.fail(e.into()).await,
        };
        debug!(tracks = ?handle, "Local media acquired");

        let events = match self.media.create_peer_session(&self.settings.ice_servers) {
            Ok(events) => events,
            Err(e) => {
                handle.stop_all();
                return self.fail(e.into()).await;
            }
        };
        self.peer_events = Some(events);
        self.negotiation.get_or_insert_with(NegotiationContext::default);
        if let Err(e) = self.media.attach_local_tracks(handle) {
            return self.fail(e.into()).await;
        }

        match self.session.direction {
            Direction::Outgoing => {
                let join = SignalEvent::Join {
                    appointment_id: self.session.appointment_id.clone(),
                };
                if let Err(e) = self.transport.send(join).await {
                    return self.fail(e.into()).await;
                }
                self.set_status(CallStatus::Joining);
            }
            Direction::Incoming => self.answer_incoming().await,
        }
    }

    async fn answer_incoming(&mut self) {
        let Some(offer) = self.incoming_offer.take() else {
            return;
        };
        let answer = match self.media.create_answer(offer.clone()).await {
            Ok(answer) => answer,
            Err(e) => return self.abort_negotiation(e).await,
        };
        let ctx = self.negotiation.get_or_insert_with(NegotiationContext::default);
        ctx.remote = Some(offer);
        ctx.local = Some(answer.clone());
        self.drain_candidates();

        let event = SignalEvent::Answer {
            call_id: self.session.session_id.clone().unwrap_or_default(),
            caller: self.session.remote_party_id.clone(),
            appointment_id: self.session.appointment_id.clone(),
            answer,
        };
        if let Err(e) = self.transport.send(event).await {
            return self.fail(e.into()).await;
        }
        info!(call = ?self.session.session_id, "Answer sent");
    }

    fn drain_candidates(&mut self) {
        let Some(ctx) = self.negotiation.as_mut() else {
            return;
        };
        let media = &mut self.media;
        ctx.candidates.drain_into(|c| media.add_ice_candidate(c));
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => self.relay_candidate(candidate).await,
            PeerEvent::RemoteTrack(kind) => {
                info!(?kind, "Remote track received");
                let _ = self.notices.send(Notice::RemoteTrack { kind });
            }
            PeerEvent::IceStateChanged(state) => self.on_ice_state(state).await,
        }
    }

    async fn on_ice_state(&mut self, state: IceConnectionState) {
        let status = self.session.status;
        match state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                if status == CallStatus::Negotiating {
                    self.on_connected();
                } else {
                    debug!(?state, %status, "ICE state change ignored");
                }
            }
            IceConnectionState::Failed => {
                self.abort_negotiation(MediaError::InvalidNegotiationState(
                    "ICE connection failed".into(),
                ))
                .await;
            }
            IceConnectionState::Disconnected if status.is_live() => {
                warn!(call = ?self.session.session_id, "ICE disconnected; waiting for recovery");
            }
            IceConnectionState::Disconnected => {
                self.abort_negotiation(MediaError::InvalidNegotiationState(
                    "ICE disconnected before the call connected".into(),
                ))
                .await;
            }
            other => debug!(state = ?other, "ICE state"),
        }
    }

    fn on_connected(&mut self) {
        self.ring = None;
        self.clock = Some(DurationTimer::start());
        self.session.timer.ring_remaining_secs = None;
        self.session.timer.elapsed_secs = Some(0);
        self.session.connected_at = Some(Utc::now());
        self.set_status(CallStatus::Connected);
    }

    // === Relay events ===

    /// Events tagged with another call's id or another appointment are not
    /// ours. Before `callRinging` only the ringing ack itself is accepted.
    fn concerns_this_call(&self, event: &SignalEvent) -> bool {
        if let Some(id) = event.call_id() {
            let ours = self.session.session_id.as_deref() == Some(id)
                || (self.call_sent && id == self.proposed_call_id);
            let ringing_ack = event.kind() == EventKind::CallRinging
                && self.session.status == CallStatus::Ringing
                && self.session.session_id.is_none();
            return ours || ringing_ack;
        }
        let appointment = match event {
            SignalEvent::JoinedCall { appointment_id }
            | SignalEvent::RecordingStarted { appointment_id }
            | SignalEvent::RecordingStopped { appointment_id } => appointment_id.as_deref(),
            SignalEvent::ChatMessage(msg) => Some(msg.appointment_id.as_str()),
            _ => None,
        };
        appointment.is_none_or(|a| a == self.session.appointment_id)
    }

    async fn on_signal(&mut self, event: SignalEvent) {
        if !self.concerns_this_call(&event) {
            debug!(event = %event.kind(), "Event for another call ignored");
            return;
        }

        match event {
            SignalEvent::JoinedCall { .. } => self.on_joined().await,
            SignalEvent::JoinError { message } => {
                self.fail(relay_error(message, "could not join the appointment"))
                    .await;
            }
            SignalEvent::CallRinging { call_id } => self.on_ringing(call_id).await,
            SignalEvent::CallAccepted { answer, .. } => self.on_accepted(answer).await,
            SignalEvent::CallRejected { .. } => self.on_declined(EndReason::Rejected).await,
            SignalEvent::CallNotAnswered { .. } => self.on_declined(EndReason::NotAnswered).await,
            SignalEvent::CallCancelled { reason, .. } => {
                self.terminate(CallOutcome::Ended(EndReason::Cancelled { reason }))
                    .await;
            }
            SignalEvent::CallEnded { message, .. } => {
                self.terminate(CallOutcome::Ended(EndReason::RemoteEnded { message }))
                    .await;
            }
            SignalEvent::CallError { message } => {
                self.fail(relay_error(message, "call request failed")).await;
            }
            SignalEvent::AnswerError { message } => {
                self.fail(relay_error(message, "answer was not delivered"))
                    .await;
            }
            SignalEvent::IceCandidate { candidate, .. } => self.on_remote_candidate(candidate),
            SignalEvent::ChatMessage(msg) => self.on_chat_received(msg).await,
            SignalEvent::RecordingStarted { .. } => self.on_recording_confirmed(true),
            SignalEvent::RecordingStopped { .. } => self.on_recording_confirmed(false),
            other => debug!(event = %other.kind(), "Unhandled event"),
        }
    }

    async fn on_joined(&mut self) {
        if self.session.status != CallStatus::Joining {
            debug!(status = %self.session.status, "joinedCall ignored");
            return;
        }

        let offer = match self.media.create_offer(self.session.media_kind.has_video()).await {
            Ok(offer) => offer,
            Err(e) => return self.abort_negotiation(e).await,
        };
        self.negotiation
            .get_or_insert_with(NegotiationContext::default)
            .local = Some(offer.clone());

        let request = SignalEvent::Call {
            appointment_id: self.session.appointment_id.clone(),
            receiver: self.session.remote_party_id.clone(),
            offer,
            call_id: self.proposed_call_id.clone(),
        };
        if let Err(e) = self.transport.send(request).await {
            return self.fail(e.into()).await;
        }
        self.call_sent = true;

        let secs = self.settings.ring_timeout_secs;
        self.ring = Some(RingTimer::start(secs));
        self.session.timer.ring_remaining_secs = Some(secs);
        info!(
            appointment = %self.session.appointment_id,
            to = %self.session.remote_party_id,
            ring_timeout_secs = secs,
            "Call request sent"
        );
        self.set_status(CallStatus::Ringing);
    }

    async fn on_ringing(&mut self, call_id: String) {
        if self.session.status != CallStatus::Ringing || self.session.session_id.is_some() {
            return;
        }
        info!(call = %call_id, "Callee ringing");
        self.session.session_id = Some(call_id);
        self.publish();

        let pending = self
            .negotiation
            .as_mut()
            .map(|ctx| std::mem::take(&mut ctx.outbound_pending))
            .unwrap_or_default();
        for candidate in pending {
            self.relay_candidate(candidate).await;
        }
    }

    async fn on_accepted(&mut self, answer: SessionDescription) {
        if self.session.status != CallStatus::Ringing {
            debug!(status = %self.session.status, "callAccepted ignored");
            return;
        }
        self.ring = None;
        self.session.timer.ring_remaining_secs = None;

        let ctx = self.negotiation.get_or_insert_with(NegotiationContext::default);
        if ctx.remote.is_some() {
            warn!("Second answer for the same call ignored");
            return;
        }
        if let Err(e) = self.media.set_remote_description(answer.clone()).await {
            return self.abort_negotiation(e).await;
        }
        if let Some(ctx) = self.negotiation.as_mut() {
            ctx.remote = Some(answer);
        }
        self.drain_candidates();
        self.set_status(CallStatus::Negotiating);
    }

    async fn on_declined(&mut self, reason: EndReason) {
        if self.session.status.is_live() {
            debug!(reason = reason.code(), "Decline after connect ignored");
            return;
        }
        self.terminate(CallOutcome::Ended(reason)).await;
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let ctx = self.negotiation.get_or_insert_with(NegotiationContext::default);
        let media = &mut self.media;
        ctx.candidates.offer(candidate, |c| media.add_ice_candidate(c));
    }

    async fn relay_candidate(&mut self, candidate: IceCandidate) {
        let Some(call_id) = self.session.session_id.clone() else {
            self.negotiation
                .get_or_insert_with(NegotiationContext::default)
                .outbound_pending
                .push(candidate);
            return;
        };
        let event = SignalEvent::IceCandidate {
            call_id,
            candidate,
            to: Some(self.session.remote_party_id.clone()),
        };
        if let Err(e) = self.transport.send(event).await {
            warn!(error = %e, "Failed to relay local ICE candidate");
        }
    }

    async fn on_chat_received(&mut self, msg: ChatMessage) {
        if let Err(e) = self.chat.save(&msg).await {
            warn!(error = %e, "Failed to persist received chat message");
        }
        let _ = self.notices.send(Notice::ChatReceived(msg));
    }

    fn on_recording_confirmed(&mut self, recording: bool) {
        if self.session.local_flags.recording == recording {
            return;
        }
        info!(recording, "Recording state confirmed by relay");
        self.session.local_flags.recording = recording;
        self.publish();
        let notice = if recording {
            Notice::RecordingStarted
        } else {
            Notice::RecordingStopped
        };
        let _ = self.notices.send(notice);
    }

    // === Timers ===

    async fn on_ring_tick(&mut self, tick: RingTick) {
        match tick {
            RingTick::Remaining(secs) => {
                self.session.timer.ring_remaining_secs = Some(secs);
                self.publish();
            }
            RingTick::Expired => {
                self.ring = None;
                self.session.timer.ring_remaining_secs = Some(0);
                info!(appointment = %self.session.appointment_id, "Ring timeout expired");
                self.end_locally(EndReason::NotAnswered).await;
            }
        }
    }

    // === Intents ===

    async fn on_intent(&mut self, intent: Intent) {
        let status = self.session.status;
        match intent {
            Intent::ToggleMute => {
                let muted = !self.session.local_flags.muted;
                self.session.local_flags.muted = muted;
                self.media.set_muted(muted);
                self.publish();
            }
            Intent::ToggleVideo if !self.session.media_kind.has_video() => {
                self.ignore(IntentKind::ToggleVideo);
            }
            Intent::ToggleVideo => {
                let enabled = !self.session.local_flags.video_enabled;
                self.session.local_flags.video_enabled = enabled;
                self.media.set_video_enabled(enabled);
                self.publish();
            }
            Intent::ToggleHold => match status {
                CallStatus::Connected => {
                    self.session.local_flags.on_hold = true;
                    self.media.set_on_hold(true);
                    self.set_status(CallStatus::OnHold);
                }
                CallStatus::OnHold => {
                    self.session.local_flags.on_hold = false;
                    self.media.set_on_hold(false);
                    self.set_status(CallStatus::Connected);
                }
                _ => self.ignore(IntentKind::ToggleHold),
            },
            Intent::ToggleRecording if !status.is_live() => {
                self.ignore(IntentKind::ToggleRecording);
            }
            Intent::ToggleRecording => {
                let appointment_id = self.session.appointment_id.clone();
                let request = if self.session.local_flags.recording {
                    SignalEvent::StopRecording { appointment_id }
                } else {
                    SignalEvent::StartRecording { appointment_id }
                };
                if let Err(e) = self.transport.send(request).await {
                    warn!(error = %e, "Recording request not sent");
                }
            }
            Intent::SendChat(content) => self.send_chat(content).await,
            Intent::End(reason) => self.end_locally(reason).await,
        }
    }

    fn ignore(&self, intent: IntentKind) {
        let status = self.session.status;
        warn!(?intent, %status, "Intent not valid in this state");
        let _ = self.notices.send(Notice::IntentIgnored { intent, status });
    }

    async fn send_chat(&mut self, content: ChatContent) {
        let empty = content.text.trim().is_empty()
            && content.audio_url.is_none()
            && content.image_url.is_none()
            && content.video_url.is_none();
        if empty {
            self.ignore(IntentKind::SendChat);
            return;
        }
        let msg = ChatMessage {
            appointment_id: self.session.appointment_id.clone(),
            message: content.text,
            audio_url: content.audio_url,
            image_url: content.image_url,
            video_url: content.video_url,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.transport.send(SignalEvent::ChatMessage(msg.clone())).await {
            warn!(error = %e, "Chat message not sent");
            return;
        }
        if let Err(e) = self.chat.save(&msg).await {
            warn!(error = %e, "Failed to persist sent chat message");
        }
    }

    // === Termination ===

    /// The call id the relay knows this call by, if it knows it at all.
    fn signaled_call_id(&self) -> Option<String> {
        self.session
            .session_id
            .clone()
            .or_else(|| self.call_sent.then(|| self.proposed_call_id.clone()))
    }

    /// Tell the relay we are leaving. Best effort; the link may be gone.
    async fn send_end_signal(&mut self) {
        let appointment_id = self.session.appointment_id.clone();
        if self.session.local_flags.recording {
            let stop = SignalEvent::StopRecording {
                appointment_id: appointment_id.clone(),
            };
            if let Err(e) = self.transport.send(stop).await {
                debug!(error = %e, "stopRecording not sent");
            }
        }
        let end = SignalEvent::EndCall {
            call_id: self.signaled_call_id(),
            appointment_id,
        };
        if let Err(e) = self.transport.send(end).await {
            debug!(error = %e, "endCall not sent");
        }
    }

    async fn end_locally(&mut self, reason: EndReason) {
        self.send_end_signal().await;
        self.terminate(CallOutcome::Ended(reason)).await;
    }

    /// Negotiation broke after the relay learned about the call: let the
    /// other party know, then fail.
    async fn abort_negotiation(&mut self, err: MediaError) {
        if self.signaled_call_id().is_some() {
            self.send_end_signal().await;
        }
        self.fail(CallError::Negotiation(err.to_string())).await;
    }

    async fn fail(&mut self, err: CallError) {
        self.terminate(CallOutcome::Failed(err)).await;
    }

    async fn terminate(&mut self, outcome: CallOutcome) {
        if self.session.outcome.is_some() {
            return;
        }
        self.ring = None;
        self.clock = None;

        // Capture still pending: wait for it so its tracks can be stopped.
        if let Some(task) = self.acquisition.take() {
            debug!("Waiting for pending capture before cleanup");
            if let Ok(Ok(handle)) = task.await {
                handle.stop_all();
            }
        }
        self.media.release();
        self.peer_events = None;
        self.remote_candidates = None;
        self.negotiation = None;
        self.session.ended_at = Some(Utc::now());

        let status = match &outcome {
            CallOutcome::Ended(reason) => {
                info!(
                    call = ?self.session.session_id,
                    reason = reason.code(),
                    duration_secs = ?self.session.duration_secs(),
                    "Call ended"
                );
                CallStatus::Ended
            }
            CallOutcome::Failed(err) => {
                warn!(
                    call = ?self.session.session_id,
                    code = err.error_code(),
                    error = %err,
                    "Call failed"
                );
                CallStatus::Failed
            }
        };
        self.session.outcome = Some(outcome.clone());
        self.set_status(status);
        let _ = self.notices.send(Notice::Terminated { outcome });
    }

    // === Publishing ===

    fn set_status(&mut self, status: CallStatus) {
        let from = self.session.status;
        if from != status {
            info!(
                appointment = %self.session.appointment_id,
                %from,
                to = %status,
                "Call status changed"
            );
        }
        self.session.status = status;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.session.clone());
    }
}

fn relay_error(message: Option<String>, fallback: &str) -> CallError {
    CallError::Transport(TransportError::Relay(
        message.unwrap_or_else(|| fallback.to_string()),
    ))
}

async fn wait_acquisition(
    task: &mut Option<Acquisition>,
) -> Result<LocalMediaHandle, MediaError> {
    match task {
        Some(handle) => handle.await.unwrap_or_else(|e| {
            Err(MediaError::DeviceUnavailable(format!("capture task failed: {e}")))
        }),
        None => std::future::pending().await,
    }
}

async fn next_remote_candidate(stream: &mut Option<CandidateStream>) -> Option<IceCandidate> {
    match stream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_peer_event(events: &mut Option<PeerEvents>) -> Option<PeerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick_ring(timer: &mut Option<RingTimer>) -> RingTick {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

async fn tick_clock(timer: &mut Option<DurationTimer>) -> u64 {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}
