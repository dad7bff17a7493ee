//! Error taxonomy for the call core.
//!
//! Uses `thiserror` for the definitions. Every variant that can end a call
//! carries a stable `error_code()` for programmatic handling by the UI.

/// Errors from the signaling transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Bad credentials. Fatal, never retried.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Signaling relay unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Timed out connecting to the signaling relay")]
    Timeout,

    #[error("Signaling link is not connected")]
    NotConnected,

    #[error("Signaling link closed: {0}")]
    Closed(String),

    /// The relay answered a request with an error event.
    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Malformed signaling frame: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the caller may retry the connect attempt manually.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkUnreachable(_) | Self::Timeout | Self::Closed(_)
        )
    }

    pub fn error_code(&self) -> &str {
        match self {
            Self::AuthRejected(_) => "AUTH_REJECTED",
            Self::NetworkUnreachable(_) => "NETWORK_UNREACHABLE",
            Self::Timeout => "CONNECT_TIMEOUT",
            Self::NotConnected => "NOT_CONNECTED",
            Self::Closed(_) => "LINK_CLOSED",
            Self::Relay(_) => "RELAY_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Errors from local capture and the peer session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("Permission to use the camera or microphone was denied")]
    PermissionDenied,

    #[error("No {0} device is available")]
    DeviceUnavailable(String),

    /// An operation arrived in the wrong negotiation phase, e.g. a candidate
    /// before the remote description.
    #[error("Invalid negotiation state: {0}")]
    InvalidNegotiationState(String),

    #[error("Session description rejected: {0}")]
    Sdp(String),

    #[error("Peer session is closed")]
    SessionClosed,
}

impl MediaError {
    /// Capture failures as opposed to negotiation failures.
    pub fn is_capture_error(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::DeviceUnavailable(_))
    }
}

/// Terminal error attached to a failed call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("Cannot connect: {0}")]
    Auth(String),

    #[error("Media unavailable: {0}")]
    Media(MediaError),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Signaling failed: {0}")]
    Transport(TransportError),
}

impl CallError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Auth(_) => "AUTH_ERROR",
            Self::Media(_) => "MEDIA_ERROR",
            Self::Negotiation(_) => "NEGOTIATION_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(_) => "Cannot connect to the call service".to_string(),
            Self::Media(MediaError::PermissionDenied) => {
                "Allow camera and microphone access to join the call".to_string()
            }
            Self::Media(e) => format!("{e}. Check that your device is connected"),
            Self::Negotiation(_) => {
                "Failed to establish a direct connection with the other party".to_string()
            }
            Self::Transport(_) => "Your connection to the call service was lost".to_string(),
        }
    }
}

impl From<TransportError> for CallError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::AuthRejected(msg) => Self::Auth(msg),
            other => Self::Transport(other),
        }
    }
}

impl From<MediaError> for CallError {
    fn from(e: MediaError) -> Self {
        if e.is_capture_error() {
            Self::Media(e)
        } else {
            Self::Negotiation(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_becomes_auth_error() {
        let err: CallError = TransportError::AuthRejected("bad token".into()).into();
        assert_eq!(err.error_code(), "AUTH_ERROR");
        assert!(!TransportError::AuthRejected("x".into()).is_retryable());
    }

    #[test]
    fn network_errors_are_retryable() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::NetworkUnreachable("refused".into()).is_retryable());
        assert!(!TransportError::Protocol("junk".into()).is_retryable());
    }

    #[test]
    fn negotiation_media_errors_are_not_capture_errors() {
        let err: CallError = MediaError::InvalidNegotiationState("no remote".into()).into();
        assert!(matches!(err, CallError::Negotiation(_)));

        let err: CallError = MediaError::PermissionDenied.into();
        assert!(matches!(err, CallError::Media(MediaError::PermissionDenied)));
    }
}
