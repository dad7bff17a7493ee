//! Call session data model.

use carecall_common::CallError;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::media::MediaKind;

/// Lifecycle status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallStatus {
    #[default]
    Idle,
    AcquiringMedia,
    /// `join` sent, waiting for `joinedCall`.
    Joining,
    /// Outgoing call request sent, callee ringing.
    Ringing,
    /// Descriptions exchanged, waiting for ICE.
    Negotiating,
    Connected,
    OnHold,
    Ended,
    Failed,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }

    /// Media is flowing (or held with ICE alive).
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::OnHold)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// User-controlled call flags.
///
/// `on_hold` is tracked on its own; `muted` and `video_enabled` keep the
/// user's choice while held and are re-applied to the tracks on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct LocalFlags {
    pub muted: bool,
    pub video_enabled: bool,
    pub on_hold: bool,
    /// Only flips once the relay confirms.
    pub recording: bool,
}

/// Read-only view of the call timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct CallTimerView {
    /// Seconds left before an unanswered outgoing call is given up.
    pub ring_remaining_secs: Option<u32>,
    /// Seconds since the call connected.
    pub elapsed_secs: Option<u64>,
}

/// Why a call ended without an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EndReason {
    LocalHangup,
    NotAnswered,
    Rejected,
    RemoteEnded { message: Option<String> },
    Cancelled { reason: Option<String> },
    /// Replaced by a newer call on the same client.
    Superseded,
}

impl EndReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LocalHangup => "local-hangup",
            Self::NotAnswered => "not-answered",
            Self::Rejected => "rejected",
            Self::RemoteEnded { .. } => "remote-ended",
            Self::Cancelled { .. } => "cancelled",
            Self::Superseded => "superseded",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::LocalHangup => "Call ended".to_string(),
            Self::NotAnswered => "No answer".to_string(),
            Self::Rejected => "The call was declined".to_string(),
            Self::RemoteEnded { message: Some(m) } => m.clone(),
            Self::RemoteEnded { message: None } => "The other party ended the call".to_string(),
            Self::Cancelled { reason: Some(r) } => format!("Call cancelled: {r}"),
            Self::Cancelled { reason: None } => "The caller cancelled the call".to_string(),
            Self::Superseded => "Call replaced by a new call".to_string(),
        }
    }
}

/// Terminal result of a call attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Ended(EndReason),
    Failed(CallError),
}

impl CallOutcome {
    pub fn user_message(&self) -> String {
        match self {
            Self::Ended(reason) => reason.user_message(),
            Self::Failed(err) => err.user_message(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Snapshot of one call attempt, as rendered by the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSession {
    /// Relay-assigned call id, known once ringing starts (or from the offer
    /// for incoming calls).
    pub session_id: Option<String>,
    pub appointment_id: String,
    pub local_party_id: String,
    pub remote_party_id: String,
    pub direction: Direction,
    pub media_kind: MediaKind,
    pub status: CallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub local_flags: LocalFlags,
    pub timer: CallTimerView,
    #[serde(skip)]
    pub outcome: Option<CallOutcome>,
}

impl CallSession {
    pub(crate) fn new(
        appointment_id: String,
        local_party_id: String,
        remote_party_id: String,
        direction: Direction,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            session_id: None,
            appointment_id,
            local_party_id,
            remote_party_id,
            direction,
            media_kind,
            status: CallStatus::Idle,
            started_at: None,
            connected_at: None,
            ended_at: None,
            local_flags: LocalFlags {
                video_enabled: media_kind.has_video(),
                ..LocalFlags::default()
            },
            timer: CallTimerView::default(),
            outcome: None,
        }
    }

    /// Whole seconds between connect and end (or now).
    pub fn duration_secs(&self) -> Option<i64> {
        let connected = self.connected_at?;
        let until = self.ended_at.unwrap_or_else(Utc::now);
        Some((until - connected).num_seconds().max(0))
    }
}
