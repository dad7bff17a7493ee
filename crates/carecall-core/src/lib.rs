//! # carecall-core
//!
//! Call orchestration for CareCall: one task per call that sequences capture,
//! signaling and peer negotiation, and a [`CallClient`] that owns the shared
//! signaling link and the single active call.
//!
//! - [`media`]: capture and peer session capabilities, plus the per-call
//!   media manager (mute, video, hold)
//! - [`ice_buffer`]: early ICE candidates, replayed once negotiation allows
//! - [`facade`]: the UI's [`CallHandle`]
//! - [`sim`]: deterministic media backend for tests and headless use

pub mod chat;
pub mod client;
pub mod facade;
pub mod ice_buffer;
mod inbox;
mod machine;
pub mod media;
pub mod session;
pub mod sim;
pub mod timer;

pub use chat::{ChatContent, ChatStore, MemoryChatStore};
pub use client::{
    CallClient, CallSettings, IncomingCall, IncomingCallListener, IncomingEvent, OutgoingCall,
};
pub use facade::{CallHandle, IntentKind, Notice};
pub use ice_buffer::IceCandidateBuffer;
pub use media::{MediaBackend, MediaKind, MediaSessionManager, TrackKind};
pub use session::{CallOutcome, CallSession, CallStatus, Direction, EndReason, LocalFlags};
