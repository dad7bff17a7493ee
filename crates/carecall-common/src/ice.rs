//! Negotiation payloads: session descriptions, ICE candidates and ICE servers.
//!
//! These mirror the browser shapes (`RTCSessionDescriptionInit`,
//! `RTCIceCandidateInit`, `RTCIceServer`) so the relay can pass them through
//! to web clients untouched.

use serde::{Deserialize, Serialize};

use crate::config::IceConfig;

/// Whether a session description is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description as exchanged over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// True when the description advertises a video media section.
    pub fn has_video(&self) -> bool {
        self.sdp.lines().any(|line| line.starts_with("m=video"))
    }
}

/// A single ICE candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u32>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// ICE server configuration (STUN/TURN) handed to the peer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// Default public STUN server.
    pub fn defaults() -> Vec<Self> {
        vec![Self {
            urls: vec!["stun:stun.l.google.com:19302".into()],
            username: None,
            credential: None,
        }]
    }

    /// Build the server list from the `[ice]` config section.
    pub fn from_config(cfg: &IceConfig) -> Vec<Self> {
        let mut servers = Vec::new();
        if !cfg.stun_urls.is_empty() {
            servers.push(Self {
                urls: cfg.stun_urls.clone(),
                username: None,
                credential: None,
            });
        }
        if let Some(turn) = cfg.turn_url.as_ref().filter(|u| !u.is_empty()) {
            servers.push(Self {
                urls: vec![turn.clone()],
                username: cfg.turn_username.clone(),
                credential: cfg.turn_credential.clone(),
            });
        }
        if servers.is_empty() {
            return Self::defaults();
        }
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_uses_browser_field_names() {
        let json = concat!(
            r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host","#,
            r#""sdpMid":"0","sdpMLineIndex":0}"#,
        );
        let cand: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(cand.sdp_mid.as_deref(), Some("0"));
        assert_eq!(cand.sdp_m_line_index, Some(0));

        let back = serde_json::to_value(&cand).unwrap();
        assert!(back.get("sdpMLineIndex").is_some());
    }

    #[test]
    fn description_type_is_lowercase() {
        let desc = SessionDescription::answer("v=0");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "answer");
    }

    #[test]
    fn video_section_detection() {
        let audio = SessionDescription::offer("v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n");
        let video = SessionDescription::offer(
            "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n",
        );
        assert!(!audio.has_video());
        assert!(video.has_video());
    }

    #[test]
    fn empty_ice_config_falls_back_to_public_stun() {
        let cfg = IceConfig {
            stun_urls: vec![],
            turn_url: None,
            turn_username: None,
            turn_credential: None,
        };
        assert_eq!(IceServerConfig::from_config(&cfg), IceServerConfig::defaults());
    }

    #[test]
    fn turn_server_carries_credentials() {
        let cfg = IceConfig {
            stun_urls: vec!["stun:stun.example.org:3478".into()],
            turn_url: Some("turn:turn.example.org:3478".into()),
            turn_username: Some("clinic".into()),
            turn_credential: Some("s3cret".into()),
        };
        let servers = IceServerConfig::from_config(&cfg);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].username.as_deref(), Some("clinic"));
    }
}
