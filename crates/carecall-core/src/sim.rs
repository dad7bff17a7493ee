//! Simulated capture devices and peer sessions.
//!
//! Deterministic stand-ins for the platform media stack. The headless CLI
//! uses them as its media backend, and tests drive them through their probes
//! to inject device failures, observe track state and push peer events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use carecall_common::{IceCandidate, IceServerConfig, MediaError, SessionDescription};
use tokio::sync::mpsc;
use tracing::debug;

use crate::media::{
    CaptureTrack, IceConnectionState, LocalMediaHandle, MediaDevices, MediaKind, PeerEvent,
    PeerEvents, PeerFactory, PeerSession, TrackKind,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A capture track that only records its state.
#[derive(Debug)]
pub struct SimTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl SimTrack {
    fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl CaptureTrack for SimTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct DeviceBehavior {
    deny_permission: bool,
    no_microphone: bool,
    no_camera: bool,
    delay: Option<Duration>,
}

/// Simulated microphone and camera.
#[derive(Default)]
pub struct SimDevices {
    behavior: Mutex<DeviceBehavior>,
    issued: Mutex<Vec<Arc<SimTrack>>>,
}

impl SimDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later request fails as if the user denied the prompt.
    pub fn deny_permission(&self) {
        lock(&self.behavior).deny_permission = true;
    }

    pub fn without_microphone(&self) {
        lock(&self.behavior).no_microphone = true;
    }

    pub fn without_camera(&self) {
        lock(&self.behavior).no_camera = true;
    }

    /// Hold each request for `delay` before answering, like a pending prompt.
    pub fn with_delay(&self, delay: Duration) {
        lock(&self.behavior).delay = Some(delay);
    }

    /// Every track handed out so far, oldest first.
    pub fn tracks(&self) -> Vec<Arc<SimTrack>> {
        lock(&self.issued).clone()
    }

    /// Most recently issued track of `kind`.
    pub fn track(&self, kind: TrackKind) -> Option<Arc<SimTrack>> {
        lock(&self.issued).iter().rev().find(|t| t.kind == kind).cloned()
    }
}

#[async_trait]
impl MediaDevices for SimDevices {
    async fn acquire(&self, kind: MediaKind) -> Result<LocalMediaHandle, MediaError> {
        let delay = lock(&self.behavior).delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut kinds = vec![TrackKind::Audio];
        {
            let behavior = lock(&self.behavior);
            if behavior.deny_permission {
                return Err(MediaError::PermissionDenied);
            }
            if behavior.no_microphone {
                return Err(MediaError::DeviceUnavailable("microphone".into()));
            }
            if kind.has_video() {
                if behavior.no_camera {
                    return Err(MediaError::DeviceUnavailable("camera".into()));
                }
                kinds.push(TrackKind::Video);
            }
        }

        let tracks: Vec<Arc<SimTrack>> = kinds
            .into_iter()
            .map(|k| Arc::new(SimTrack::new(k)))
            .collect();
        lock(&self.issued).extend(tracks.iter().cloned());
        debug!(?kind, "Simulated capture opened");
        Ok(LocalMediaHandle::new(
            tracks
                .into_iter()
                .map(|t| t as Arc<dyn CaptureTrack>)
                .collect(),
        ))
    }
}

#[derive(Default)]
struct PeerState {
    ice_servers: Vec<IceServerConfig>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    tracks: Vec<TrackKind>,
    connected_reported: bool,
    closed: bool,
}

/// Test-side view of a simulated peer session.
#[derive(Clone)]
pub struct SimPeerProbe {
    state: Arc<Mutex<PeerState>>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl SimPeerProbe {
    /// Remote candidates applied so far, in application order.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.state).applied.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.state).local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.state).remote.clone()
    }

    pub fn attached_tracks(&self) -> Vec<TrackKind> {
        lock(&self.state).tracks.clone()
    }

    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        lock(&self.state).ice_servers.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Push a peer event as if the platform raised it.
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_ice_state(&self, state: IceConnectionState) {
        self.emit(PeerEvent::IceStateChanged(state));
    }
}

/// Creates [`SimPeer`]s and keeps a probe for each.
#[derive(Default)]
pub struct SimPeerFactory {
    auto_connect: bool,
    created: Mutex<Vec<SimPeerProbe>>,
}

impl SimPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report ICE connected as soon as both descriptions are applied.
    pub fn auto_connect() -> Self {
        Self {
            auto_connect: true,
            ..Self::default()
        }
    }

    pub fn last_peer(&self) -> Option<SimPeerProbe> {
        lock(&self.created).last().cloned()
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.created).len()
    }
}

impl PeerFactory for SimPeerFactory {
    fn create(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<(Box<dyn PeerSession>, PeerEvents), MediaError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(PeerState {
            ice_servers: ice_servers.to_vec(),
            ..PeerState::default()
        }));
        lock(&self.created).push(SimPeerProbe {
            state: Arc::clone(&state),
            events: tx.clone(),
        });
        let peer = SimPeer {
            state,
            events: tx,
            auto_connect: self.auto_connect,
        };
        Ok((Box::new(peer), rx))
    }
}

static SDP_VERSION: AtomicU64 = AtomicU64::new(1);

fn synth_sdp(video: bool) -> String {
    let version = SDP_VERSION.fetch_add(1, Ordering::Relaxed);
    let mut sdp = format!(
        "v=0\r\no=- {version} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
         m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n"
    );
    if video {
        sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 96\r\n");
    }
    sdp
}

/// A peer session that negotiates nothing but follows the browser's rules.
pub struct SimPeer {
    state: Arc<Mutex<PeerState>>,
    events: mpsc::UnboundedSender<PeerEvent>,
    auto_connect: bool,
}

impl SimPeer {
    fn set_local(&self, desc: SessionDescription) {
        lock(&self.state).local = Some(desc);
        let _ = self
            .events
            .send(PeerEvent::LocalCandidate(IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.0.2.10 50000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            }));
        self.maybe_connect();
    }

    fn maybe_connect(&self) {
        let mut state = lock(&self.state);
        if !self.auto_connect || state.connected_reported || state.closed {
            return;
        }
        if state.local.is_some() && state.remote.is_some() {
            state.connected_reported = true;
            let _ = self
                .events
                .send(PeerEvent::IceStateChanged(IceConnectionState::Checking));
            let _ = self
                .events
                .send(PeerEvent::IceStateChanged(IceConnectionState::Connected));
        }
    }

    fn ensure_open(&self) -> Result<(), MediaError> {
        if lock(&self.state).closed {
            return Err(MediaError::SessionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl PeerSession for SimPeer {
    fn add_track(&mut self, track: Arc<dyn CaptureTrack>) {
        lock(&self.state).tracks.push(track.kind());
    }

    async fn create_offer(&mut self, wants_video: bool) -> Result<SessionDescription, MediaError> {
        self.ensure_open()?;
        let offer = SessionDescription::offer(synth_sdp(wants_video));
        self.set_local(offer.clone());
        Ok(offer)
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError> {
        self.ensure_open()?;
        let video = {
            let state = lock(&self.state);
            let remote = state.remote.as_ref().ok_or_else(|| {
                MediaError::InvalidNegotiationState("no remote offer to answer".into())
            })?;
            remote.has_video() && state.tracks.contains(&TrackKind::Video)
        };
        let answer = SessionDescription::answer(synth_sdp(video));
        self.set_local(answer.clone());
        Ok(answer)
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), MediaError> {
        self.ensure_open()?;
        {
            let mut state = lock(&self.state);
            if state.remote.is_some() {
                return Err(MediaError::InvalidNegotiationState(
                    "remote description already set".into(),
                ));
            }
            if desc.sdp.trim().is_empty() {
                return Err(MediaError::Sdp("empty session description".into()));
            }
            state.remote = Some(desc);
        }
        self.maybe_connect();
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(MediaError::SessionClosed);
        }
        if state.remote.is_none() {
            return Err(MediaError::InvalidNegotiationState(
                "remote description not set".into(),
            ));
        }
        state.applied.push(candidate.clone());
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.state).closed = true;
    }
}
