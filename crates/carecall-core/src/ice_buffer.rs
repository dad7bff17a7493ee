//! Holds remote ICE candidates until the remote description is applied.
//!
//! Candidates routinely arrive before the answer (or, on the callee side,
//! before the offer has been applied). Applying them early fails, so they
//! are queued in receipt order and replayed exactly once.

use carecall_common::{IceCandidate, MediaError};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct IceCandidateBuffer {
    pending: Vec<IceCandidate>,
    remote_applied: bool,
}

impl IceCandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `candidate`, or apply it right away once the remote description
    /// is in place. Application failures are logged and otherwise ignored.
    pub fn offer<F>(&mut self, candidate: IceCandidate, mut apply: F)
    where
        F: FnMut(&IceCandidate) -> Result<(), MediaError>,
    {
        if self.remote_applied {
            apply_one(&candidate, &mut apply);
        } else {
            debug!(queued = self.pending.len() + 1, "Buffering early ICE candidate");
            self.pending.push(candidate);
        }
    }

    /// Mark the remote description as applied and replay the queue in
    /// receipt order. Returns how many candidates were replayed; a second
    /// call does nothing.
    pub fn drain_into<F>(&mut self, mut apply: F) -> usize
    where
        F: FnMut(&IceCandidate) -> Result<(), MediaError>,
    {
        if self.remote_applied {
            return 0;
        }
        self.remote_applied = true;
        let pending = std::mem::take(&mut self.pending);
        for candidate in &pending {
            apply_one(candidate, &mut apply);
        }
        if !pending.is_empty() {
            debug!(count = pending.len(), "Replayed buffered ICE candidates");
        }
        pending.len()
    }

    pub fn is_remote_applied(&self) -> bool {
        self.remote_applied
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn apply_one<F>(candidate: &IceCandidate, apply: &mut F)
where
    F: FnMut(&IceCandidate) -> Result<(), MediaError>,
{
    if let Err(e) = apply(candidate) {
        warn!(candidate = %candidate.candidate, error = %e, "Failed to apply ICE candidate");
    }
}
