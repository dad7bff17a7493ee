//! Remote ICE candidates for announced incoming calls.
//!
//! Callers trickle candidates right after `incomingCall`, usually long before
//! anyone answers. The inbox watches the shared link from `connect` on, keeps
//! those candidates per call id in receipt order, and once the call is
//! accepted streams them to the call task, followed by every later one.

use std::collections::{HashMap, VecDeque};

use carecall_common::{EventKind, IceCandidate, SignalEvent};
use carecall_signaling::{Subscription, TransportEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Announced calls tracked at once; the oldest is dropped beyond this.
const MAX_ANNOUNCED: usize = 16;
/// Candidates held per unanswered call.
const MAX_HELD: usize = 256;

pub(crate) const INBOX_EVENTS: &[EventKind] = &[
    EventKind::IncomingCall,
    EventKind::IceCandidate,
    EventKind::CallCancelled,
];

pub(crate) type CandidateStream = mpsc::UnboundedReceiver<IceCandidate>;

enum Command {
    Claim {
        call_id: String,
        tx: mpsc::UnboundedSender<IceCandidate>,
    },
    Forget {
        call_id: String,
    },
}

/// Handle used by the client and the listener.
#[derive(Clone)]
pub(crate) struct CandidateInbox {
    commands: mpsc::UnboundedSender<Command>,
}

/// The inbox task, started once the link is up.
pub(crate) struct InboxWorker {
    commands: mpsc::UnboundedReceiver<Command>,
}

enum Slot {
    Held(Vec<IceCandidate>),
    Streaming(mpsc::UnboundedSender<IceCandidate>),
}

impl CandidateInbox {
    pub(crate) fn new() -> (Self, InboxWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { commands: tx }, InboxWorker { commands: rx })
    }

    /// Take over `call_id`'s candidates: everything held so far, then each
    /// new one as it arrives.
    pub(crate) fn claim(&self, call_id: &str) -> CandidateStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Claim {
            call_id: call_id.to_string(),
            tx,
        });
        rx
    }

    /// Drop whatever is held for a call that will not be answered.
    pub(crate) fn forget(&self, call_id: &str) {
        let _ = self.commands.send(Command::Forget {
            call_id: call_id.to_string(),
        });
    }
}

impl InboxWorker {
    /// Runs until every [`CandidateInbox`] handle is gone.
    pub(crate) async fn run(mut self, mut events: Subscription) {
        let mut slots: HashMap<String, Slot> = HashMap::new();
        let mut announced: VecDeque<String> = VecDeque::new();

        loop {
            // Relay events first: by the time a command names a call, its
            // announcement is already queued here.
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Some(TransportEvent::Signal(signal)) => {
                        on_signal(&mut slots, &mut announced, signal);
                    }
                    Some(TransportEvent::Disconnected { .. }) => {
                        // Calls announced on a dead link are gone with it.
                        slots.clear();
                        announced.clear();
                    }
                    None => break,
                },
                command = self.commands.recv() => match command {
                    Some(Command::Claim { call_id, tx }) => {
                        let held = match slots.remove(&call_id) {
                            Some(Slot::Held(held)) => held,
                            _ => Vec::new(),
                        };
                        debug!(call = %call_id, held = held.len(), "Incoming call claimed");
                        for candidate in held {
                            let _ = tx.send(candidate);
                        }
                        announced.retain(|id| *id != call_id);
                        slots.insert(call_id, Slot::Streaming(tx));
                    }
                    Some(Command::Forget { call_id }) => {
                        if let Some(Slot::Held(_)) = slots.get(&call_id) {
                            slots.remove(&call_id);
                        }
                        announced.retain(|id| *id != call_id);
                    }
                    None => break,
                },
            }
        }
    }
}

fn on_signal(
    slots: &mut HashMap<String, Slot>,
    announced: &mut VecDeque<String>,
    signal: SignalEvent,
) {
    match signal {
        SignalEvent::IncomingCall { call_id, .. } => {
            if slots.contains_key(&call_id) {
                return;
            }
            if announced.len() >= MAX_ANNOUNCED {
                if let Some(oldest) = announced.pop_front() {
                    slots.remove(&oldest);
                }
            }
            announced.push_back(call_id.clone());
            slots.insert(call_id, Slot::Held(Vec::new()));
        }
        SignalEvent::IceCandidate {
            call_id, candidate, ..
        } => match slots.get_mut(&call_id) {
            Some(Slot::Held(held)) if held.len() < MAX_HELD => held.push(candidate),
            Some(Slot::Held(_)) => {
                warn!(call = %call_id, "Too many early ICE candidates; dropping");
            }
            Some(Slot::Streaming(tx)) => {
                if tx.send(candidate).is_err() {
                    // The call task has finished.
                    slots.remove(&call_id);
                }
            }
            None => {}
        },
        SignalEvent::CallCancelled {
            call_id: Some(call_id),
            ..
        } => {
            if let Some(Slot::Held(_)) = slots.get(&call_id) {
                slots.remove(&call_id);
                announced.retain(|id| *id != call_id);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carecall_common::SessionDescription;
    use carecall_signaling::{Credentials, MemoryTransport, RelayProbe, SignalingTransport};

    fn announce(call_id: &str) -> SignalEvent {
        SignalEvent::IncomingCall {
            call_id: call_id.into(),
            caller: "pat-1".into(),
            appointment_id: "apt-1".into(),
            offer: SessionDescription::offer("v=0"),
            is_video_call: false,
        }
    }

    fn trickle(call_id: &str, n: u32) -> SignalEvent {
        SignalEvent::IceCandidate {
            call_id: call_id.into(),
            candidate: IceCandidate::new(format!("candidate:{n}")),
            to: None,
        }
    }

    async fn started() -> (CandidateInbox, RelayProbe) {
        let (link, relay) = MemoryTransport::pair();
        link.connect(&Credentials::bearer("t")).await.unwrap();
        let (inbox, worker) = CandidateInbox::new();
        tokio::spawn(worker.run(link.subscribe().only(INBOX_EVENTS)));
        (inbox, relay)
    }

    #[tokio::test]
    async fn held_candidates_come_first_then_live_ones() {
        let (inbox, relay) = started().await;
        relay.push(announce("c9"));
        relay.push(trickle("c9", 1));
        relay.push(trickle("other", 7));
        relay.push(trickle("c9", 2));

        let mut stream = inbox.claim("c9");
        tokio::task::yield_now().await;
        relay.push(trickle("c9", 3));

        for n in 1..=3 {
            let got = stream.recv().await.unwrap();
            assert_eq!(got.candidate, format!("candidate:{n}"));
        }
    }

    #[tokio::test]
    async fn forgotten_calls_hand_over_nothing() {
        let (inbox, relay) = started().await;
        relay.push(announce("c4"));
        relay.push(trickle("c4", 1));

        inbox.forget("c4");
        let mut stream = inbox.claim("c4");
        tokio::task::yield_now().await;
        relay.push(trickle("c4", 2));
        assert_eq!(stream.recv().await.unwrap().candidate, "candidate:2");
    }

    #[tokio::test]
    async fn candidates_for_unannounced_calls_are_ignored() {
        let (inbox, relay) = started().await;
        relay.push(trickle("ghost", 1));
        relay.push(announce("c5"));

        let mut stream = inbox.claim("c5");
        tokio::task::yield_now().await;
        relay.push(trickle("c5", 2));
        assert_eq!(stream.recv().await.unwrap().candidate, "candidate:2");
    }

    #[tokio::test]
    async fn cancelled_calls_drop_their_candidates() {
        let (inbox, relay) = started().await;
        relay.push(announce("c6"));
        relay.push(trickle("c6", 1));
        relay.push(SignalEvent::CallCancelled {
            call_id: Some("c6".into()),
            reason: None,
        });

        let mut stream = inbox.claim("c6");
        tokio::task::yield_now().await;
        relay.push(trickle("c6", 2));
        assert_eq!(stream.recv().await.unwrap().candidate, "candidate:2");
    }
}
