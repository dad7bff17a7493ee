//! The UI's handle on a call.
//!
//! Intent methods return immediately; the intent is queued on the call task
//! and applied in order against whatever state the call is in by then.
//! Rendering reads [`CallHandle::snapshot`] or watches for changes, and
//! everything that is not state (ignored intents, remote tracks, chat,
//! recording confirmations, termination) arrives on the notice stream.

use carecall_common::{CallError, ChatMessage, TransportError};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::warn;

use crate::chat::ChatContent;
use crate::media::TrackKind;
use crate::session::{CallOutcome, CallSession, CallStatus, EndReason};

pub(crate) const NOTICE_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Intent {
    ToggleMute,
    ToggleVideo,
    ToggleHold,
    ToggleRecording,
    SendChat(ChatContent),
    End(EndReason),
}

impl Intent {
    pub(crate) fn kind(&self) -> IntentKind {
        match self {
            Self::ToggleMute => IntentKind::ToggleMute,
            Self::ToggleVideo => IntentKind::ToggleVideo,
            Self::ToggleHold => IntentKind::ToggleHold,
            Self::ToggleRecording => IntentKind::ToggleRecording,
            Self::SendChat(_) => IntentKind::SendChat,
            Self::End(_) => IntentKind::EndCall,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    ToggleMute,
    ToggleVideo,
    ToggleHold,
    ToggleRecording,
    SendChat,
    EndCall,
}

/// Non-state happenings the UI reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The intent made no sense in `status` and was dropped.
    IntentIgnored { intent: IntentKind, status: CallStatus },
    RemoteTrack { kind: TrackKind },
    ChatReceived(ChatMessage),
    RecordingStarted,
    RecordingStopped,
    Terminated { outcome: CallOutcome },
}

/// Cloneable handle to a running call.
#[derive(Clone)]
pub struct CallHandle {
    intents: mpsc::UnboundedSender<Intent>,
    snapshot: watch::Receiver<CallSession>,
    notices: broadcast::Sender<Notice>,
}

impl CallHandle {
    pub(crate) fn new(
        intents: mpsc::UnboundedSender<Intent>,
        snapshot: watch::Receiver<CallSession>,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        Self {
            intents,
            snapshot,
            notices,
        }
    }

    /// Current state of the call.
    pub fn snapshot(&self) -> CallSession {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> CallStatus {
        self.snapshot.borrow().status
    }

    /// Seconds left on the ring countdown, while ringing.
    pub fn ring_countdown(&self) -> Option<u32> {
        self.snapshot.borrow().timer.ring_remaining_secs
    }

    /// Receiver that wakes on every state change.
    pub fn watch(&self) -> watch::Receiver<CallSession> {
        self.snapshot.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Resolve once the call has ended or failed.
    pub async fn wait_terminated(&self) -> CallOutcome {
        let mut rx = self.snapshot.clone();
        if let Ok(session) = rx.wait_for(|s| s.outcome.is_some()).await {
            if let Some(outcome) = &session.outcome {
                return outcome.clone();
            }
        }
        // The task is gone; its last snapshot is all there is.
        rx.borrow().outcome.clone().unwrap_or_else(|| {
            CallOutcome::Failed(CallError::Transport(TransportError::Closed(
                "call task stopped".into(),
            )))
        })
    }

    pub fn toggle_mute(&self) {
        self.dispatch(Intent::ToggleMute);
    }

    pub fn toggle_video(&self) {
        self.dispatch(Intent::ToggleVideo);
    }

    pub fn toggle_hold(&self) {
        self.dispatch(Intent::ToggleHold);
    }

    /// Ask the relay to start or stop recording. The `recording` flag follows
    /// the relay's confirmation, not this call.
    pub fn toggle_recording(&self) {
        self.dispatch(Intent::ToggleRecording);
    }

    pub fn send_chat_message(&self, content: ChatContent) {
        self.dispatch(Intent::SendChat(content));
    }

    /// Hang up, or cancel while still setting up or ringing.
    pub fn end_call(&self) {
        self.dispatch(Intent::End(EndReason::LocalHangup));
    }

    pub(crate) fn end_with(&self, reason: EndReason) {
        self.dispatch(Intent::End(reason));
    }

    fn dispatch(&self, intent: Intent) {
        let kind = intent.kind();
        if self.intents.send(intent).is_err() {
            let status = self.status();
            warn!(intent = ?kind, %status, "Call is over; intent ignored");
            let _ = self.notices.send(Notice::IntentIgnored {
                intent: kind,
                status,
            });
        }
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.snapshot.borrow();
        f.debug_struct("CallHandle")
            .field("appointment_id", &session.appointment_id)
            .field("status", &session.status)
            .finish()
    }
}
