//! Signaling events exchanged with the call relay.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": {...}}` with
//! camelCase fields. The relay only carries negotiation and call control;
//! audio and video flow peer to peer, NOT through this channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ice::{IceCandidate, SessionDescription};

/// Signaling messages between the call client and the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SignalEvent {
    // === Client → Relay ===
    /// Authenticate the link with a bearer token.
    Identify { token: String },

    /// Join the appointment's call room.
    Join { appointment_id: String },

    /// Outgoing call request carrying our SDP offer.
    Call {
        appointment_id: String,
        receiver: String,
        offer: SessionDescription,
        call_id: String,
    },

    /// Callee's SDP answer for an incoming call.
    Answer {
        call_id: String,
        caller: String,
        appointment_id: String,
        answer: SessionDescription,
    },

    /// Decline an incoming call.
    RejectCall { call_id: String },

    /// Hang up (or cancel while ringing).
    EndCall {
        call_id: Option<String>,
        appointment_id: String,
    },

    StartRecording { appointment_id: String },

    StopRecording { appointment_id: String },

    // === Relay → Client ===
    /// Authentication accepted.
    Ready {
        session_id: String,
        user_id: Option<String>,
    },

    AuthError { message: Option<String> },

    JoinedCall { appointment_id: Option<String> },

    JoinError { message: Option<String> },

    /// Someone is calling us.
    IncomingCall {
        call_id: String,
        caller: String,
        appointment_id: String,
        offer: SessionDescription,
        #[serde(default)]
        is_video_call: bool,
    },

    /// The relay accepted our call request and the callee is ringing.
    CallRinging { call_id: String },

    CallAccepted {
        answer: SessionDescription,
        call_id: Option<String>,
    },

    CallRejected { call_id: Option<String> },

    CallNotAnswered { call_id: Option<String> },

    CallCancelled {
        call_id: Option<String>,
        reason: Option<String>,
    },

    CallEnded {
        call_id: Option<String>,
        message: Option<String>,
    },

    CallError { message: Option<String> },

    AnswerError { message: Option<String> },

    RecordingStarted { appointment_id: Option<String> },

    RecordingStopped { appointment_id: Option<String> },

    // === Bidirectional ===
    IceCandidate {
        call_id: String,
        candidate: IceCandidate,
        to: Option<String>,
    },

    ChatMessage(ChatMessage),
}

/// A chat message exchanged during an appointment call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub appointment_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Discriminant of [`SignalEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Identify,
    Join,
    Call,
    Answer,
    RejectCall,
    EndCall,
    StartRecording,
    StopRecording,
    Ready,
    AuthError,
    JoinedCall,
    JoinError,
    IncomingCall,
    CallRinging,
    CallAccepted,
    CallRejected,
    CallNotAnswered,
    CallCancelled,
    CallEnded,
    CallError,
    AnswerError,
    RecordingStarted,
    RecordingStopped,
    IceCandidate,
    ChatMessage,
}

impl EventKind {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Join => "join",
            Self::Call => "call",
            Self::Answer => "answer",
            Self::RejectCall => "rejectCall",
            Self::EndCall => "endCall",
            Self::StartRecording => "startRecording",
            Self::StopRecording => "stopRecording",
            Self::Ready => "ready",
            Self::AuthError => "authError",
            Self::JoinedCall => "joinedCall",
            Self::JoinError => "joinError",
            Self::IncomingCall => "incomingCall",
            Self::CallRinging => "callRinging",
            Self::CallAccepted => "callAccepted",
            Self::CallRejected => "callRejected",
            Self::CallNotAnswered => "callNotAnswered",
            Self::CallCancelled => "callCancelled",
            Self::CallEnded => "callEnded",
            Self::CallError => "callError",
            Self::AnswerError => "answerError",
            Self::RecordingStarted => "recordingStarted",
            Self::RecordingStopped => "recordingStopped",
            Self::IceCandidate => "iceCandidate",
            Self::ChatMessage => "chatMessage",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl SignalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Identify { .. } => EventKind::Identify,
            Self::Join { .. } => EventKind::Join,
            Self::Call { .. } => EventKind::Call,
            Self::Answer { .. } => EventKind::Answer,
            Self::RejectCall { .. } => EventKind::RejectCall,
            Self::EndCall { .. } => EventKind::EndCall,
            Self::StartRecording { .. } => EventKind::StartRecording,
            Self::StopRecording { .. } => EventKind::StopRecording,
            Self::Ready { .. } => EventKind::Ready,
            Self::AuthError { .. } => EventKind::AuthError,
            Self::JoinedCall { .. } => EventKind::JoinedCall,
            Self::JoinError { .. } => EventKind::JoinError,
            Self::IncomingCall { .. } => EventKind::IncomingCall,
            Self::CallRinging { .. } => EventKind::CallRinging,
            Self::CallAccepted { .. } => EventKind::CallAccepted,
            Self::CallRejected { .. } => EventKind::CallRejected,
            Self::CallNotAnswered { .. } => EventKind::CallNotAnswered,
            Self::CallCancelled { .. } => EventKind::CallCancelled,
            Self::CallEnded { .. } => EventKind::CallEnded,
            Self::CallError { .. } => EventKind::CallError,
            Self::AnswerError { .. } => EventKind::AnswerError,
            Self::RecordingStarted { .. } => EventKind::RecordingStarted,
            Self::RecordingStopped { .. } => EventKind::RecordingStopped,
            Self::IceCandidate { .. } => EventKind::IceCandidate,
            Self::ChatMessage(_) => EventKind::ChatMessage,
        }
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a wire frame. Relays omit `data` for payload-less events, so a
    /// missing or null `data` is read as an empty object.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(text)?;
        if let Some(obj) = value.as_object_mut() {
            let empty = matches!(obj.get("data"), None | Some(Value::Null));
            if empty {
                obj.insert("data".into(), Value::Object(Default::default()));
            }
        }
        serde_json::from_value(value)
    }

    /// The call id the event refers to, when it carries one.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::Call { call_id, .. }
            | Self::Answer { call_id, .. }
            | Self::RejectCall { call_id }
            | Self::IncomingCall { call_id, .. }
            | Self::CallRinging { call_id }
            | Self::IceCandidate { call_id, .. } => Some(call_id),
            Self::EndCall { call_id, .. }
            | Self::CallAccepted { call_id, .. }
            | Self::CallRejected { call_id }
            | Self::CallNotAnswered { call_id }
            | Self::CallCancelled { call_id, .. }
            | Self::CallEnded { call_id, .. } => call_id.as_deref(),
            _ => None,
        }
    }
}
