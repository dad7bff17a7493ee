//! Local capture and peer session management.
//!
//! The platform's capture devices and peer connection are reached through
//! the [`MediaDevices`] and [`PeerFactory`]/[`PeerSession`] traits. A
//! [`MediaSessionManager`] owns one call's tracks and peer session and
//! implements mute, video and hold purely through track enablement, so none
//! of them ever renegotiates.

use std::sync::Arc;

use async_trait::async_trait;
use carecall_common::{IceCandidate, IceServerConfig, MediaError, SessionDescription};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// What a call captures and negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    AudioOnly,
    AudioVideo,
}

impl MediaKind {
    pub fn has_video(&self) -> bool {
        matches!(self, Self::AudioVideo)
    }

    pub fn from_video(video: bool) -> Self {
        if video {
            Self::AudioVideo
        } else {
            Self::AudioOnly
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A live capture track (microphone or camera).
pub trait CaptureTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Release the underlying device. A stopped track stays stopped.
    fn stop(&self);
}

/// The tracks returned by one capture request.
#[derive(Clone, Default)]
pub struct LocalMediaHandle {
    tracks: Vec<Arc<dyn CaptureTrack>>,
}

impl LocalMediaHandle {
    pub fn new(tracks: Vec<Arc<dyn CaptureTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn CaptureTrack>] {
        &self.tracks
    }

    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind() == TrackKind::Video)
    }

    fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl std::fmt::Debug for LocalMediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<_> = self.tracks.iter().map(|t| t.kind()).collect();
        f.debug_struct("LocalMediaHandle")
            .field("tracks", &kinds)
            .finish()
    }
}

/// Camera and microphone access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Prompt for and open capture devices for `kind`.
    async fn acquire(&self, kind: MediaKind) -> Result<LocalMediaHandle, MediaError>;
}

/// ICE connection state as reported by the peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from a peer session.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local candidate to relay to the other party.
    LocalCandidate(IceCandidate),
    /// The remote party's track arrived.
    RemoteTrack(TrackKind),
    IceStateChanged(IceConnectionState),
}

pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// One peer-to-peer connection.
#[async_trait]
pub trait PeerSession: Send {
    fn add_track(&mut self, track: Arc<dyn CaptureTrack>);

    /// Create an offer and apply it as the local description.
    async fn create_offer(&mut self, wants_video: bool) -> Result<SessionDescription, MediaError>;

    /// Create an answer to the applied remote offer and apply it locally.
    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError>;

    async fn set_remote_description(&mut self, desc: SessionDescription)
    -> Result<(), MediaError>;

    /// Fails with `InvalidNegotiationState` while no remote description is set.
    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError>;

    fn close(&mut self);
}

pub trait PeerFactory: Send + Sync {
    fn create(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<(Box<dyn PeerSession>, PeerEvents), MediaError>;
}

/// Shared capture and peer capabilities, cloned into every call.
#[derive(Clone)]
pub struct MediaBackend {
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerFactory>,
}

impl MediaBackend {
    pub fn new(devices: Arc<dyn MediaDevices>, peers: Arc<dyn PeerFactory>) -> Self {
        Self { devices, peers }
    }

    pub async fn acquire_local_media(
        &self,
        kind: MediaKind,
    ) -> Result<LocalMediaHandle, MediaError> {
        let handle = self.devices.acquire(kind).await?;
        if kind.has_video() && !handle.has_video() {
            handle.stop_all();
            return Err(MediaError::DeviceUnavailable("camera".into()));
        }
        Ok(handle)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TrackFlags {
    muted: bool,
    video_enabled: bool,
    on_hold: bool,
}

/// Owns the capture tracks and peer session of a single call.
pub struct MediaSessionManager {
    backend: MediaBackend,
    local: Option<LocalMediaHandle>,
    peer: Option<Box<dyn PeerSession>>,
    flags: TrackFlags,
    released: bool,
}

impl MediaSessionManager {
    pub fn new(backend: MediaBackend, kind: MediaKind) -> Self {
        Self {
            backend,
            local: None,
            peer: None,
            flags: TrackFlags {
                video_enabled: kind.has_video(),
                ..TrackFlags::default()
            },
            released: false,
        }
    }

    pub fn backend(&self) -> &MediaBackend {
        &self.backend
    }

    /// Open the peer session. Its callbacks arrive on the returned stream.
    pub fn create_peer_session(
        &mut self,
        ice_servers: &[IceServerConfig],
    ) -> Result<PeerEvents, MediaError> {
        if self.released {
            return Err(MediaError::SessionClosed);
        }
        let (peer, events) = self.backend.peers.create(ice_servers)?;
        self.peer = Some(peer);
        Ok(events)
    }

    /// Take ownership of captured tracks and add them to the peer session.
    pub fn attach_local_tracks(&mut self, handle: LocalMediaHandle) -> Result<(), MediaError> {
        if self.released {
            handle.stop_all();
            return Err(MediaError::SessionClosed);
        }
        let peer = self.peer.as_mut().ok_or(MediaError::SessionClosed)?;
        for track in handle.tracks() {
            peer.add_track(Arc::clone(track));
        }
        self.local = Some(handle);
        self.apply_track_state();
        Ok(())
    }

    pub async fn create_offer(
        &mut self,
        wants_video: bool,
    ) -> Result<SessionDescription, MediaError> {
        self.peer_mut()?.create_offer(wants_video).await
    }

    /// Apply `remote` and produce the matching answer.
    pub async fn create_answer(
        &mut self,
        remote: SessionDescription,
    ) -> Result<SessionDescription, MediaError> {
        let peer = self.peer_mut()?;
        peer.set_remote_description(remote).await?;
        peer.create_answer().await
    }

    pub async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), MediaError> {
        self.peer_mut()?.set_remote_description(desc).await
    }

    pub fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError> {
        self.peer_mut()?.add_ice_candidate(candidate)
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.flags.muted = muted;
        self.apply_track_state();
    }

    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.flags.video_enabled = enabled;
        self.apply_track_state();
    }

    /// Disable every track while held; on resume each track goes back to
    /// whatever the user last chose for it.
    pub fn set_on_hold(&mut self, on_hold: bool) {
        self.flags.on_hold = on_hold;
        self.apply_track_state();
    }

    fn apply_track_state(&self) {
        let Some(local) = &self.local else {
            return;
        };
        let f = self.flags;
        local.set_enabled(TrackKind::Audio, !f.muted && !f.on_hold);
        local.set_enabled(TrackKind::Video, f.video_enabled && !f.on_hold);
        debug!(muted = f.muted, video = f.video_enabled, hold = f.on_hold, "Track state applied");
    }

    /// Stop every capture track and close the peer session. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(local) = self.local.take() {
            local.stop_all();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
        info!("Media session released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn peer_mut(&mut self) -> Result<&mut Box<dyn PeerSession>, MediaError> {
        self.peer.as_mut().ok_or(MediaError::SessionClosed)
    }
}

impl Drop for MediaSessionManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDevices, SimPeerFactory};

    fn backend() -> (Arc<SimDevices>, Arc<SimPeerFactory>, MediaBackend) {
        let devices = Arc::new(SimDevices::new());
        let peers = Arc::new(SimPeerFactory::new());
        let backend = MediaBackend::new(devices.clone(), peers.clone());
        (devices, peers, backend)
    }

    async fn video_call() -> (Arc<SimDevices>, MediaSessionManager) {
        let (devices, _peers, backend) = backend();
        let mut media = MediaSessionManager::new(backend.clone(), MediaKind::AudioVideo);
        media.create_peer_session(&IceServerConfig::defaults()).unwrap();
        let handle = backend.acquire_local_media(MediaKind::AudioVideo).await.unwrap();
        media.attach_local_tracks(handle).unwrap();
        (devices, media)
    }

    #[tokio::test]
    async fn hold_cycle_restores_user_choices() {
        let (devices, mut media) = video_call().await;
        media.set_muted(true);

        media.set_on_hold(true);
        assert!(!devices.track(TrackKind::Audio).unwrap().is_enabled());
        assert!(!devices.track(TrackKind::Video).unwrap().is_enabled());

        media.set_on_hold(false);
        assert!(!devices.track(TrackKind::Audio).unwrap().is_enabled());
        assert!(devices.track(TrackKind::Video).unwrap().is_enabled());
    }

    #[tokio::test]
    async fn changes_during_hold_apply_on_resume() {
        let (devices, mut media) = video_call().await;

        media.set_on_hold(true);
        media.set_video_enabled(false);
        assert!(!devices.track(TrackKind::Audio).unwrap().is_enabled());

        media.set_on_hold(false);
        assert!(devices.track(TrackKind::Audio).unwrap().is_enabled());
        assert!(!devices.track(TrackKind::Video).unwrap().is_enabled());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (devices, mut media) = video_call().await;
        media.release();
        media.release();
        assert!(media.is_released());
        assert!(devices.tracks().iter().all(|t| t.is_stopped()));
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_rejected() {
        let (_devices, mut media) = video_call().await;
        let err = media
            .add_ice_candidate(&IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 9 typ host"))
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidNegotiationState(_)));
    }

    #[tokio::test]
    async fn missing_camera_fails_video_acquisition() {
        let (devices, _peers, backend) = backend();
        devices.without_camera();
        let err = backend
            .acquire_local_media(MediaKind::AudioVideo)
            .await
            .unwrap_err();
        assert_eq!(err, MediaError::DeviceUnavailable("camera".into()));
    }
}
