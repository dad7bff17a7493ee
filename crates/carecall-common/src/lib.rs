//! # carecall-common
//!
//! Shared configuration, error taxonomy and signaling wire types used across the
//! CareCall crates. No call logic lives here, just primitives and contracts.

pub mod config;
pub mod error;
pub mod events;
pub mod ice;

pub use error::{CallError, MediaError, TransportError};
pub use events::{ChatMessage, EventKind, SignalEvent};
pub use ice::{IceCandidate, IceServerConfig, SdpType, SessionDescription};
