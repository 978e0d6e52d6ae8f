//! Per-peer signaling state machine.
//!
//! One [`SignalingSession`] exists for every remote participant of a call.
//! It turns outgoing SDP/ICE into [`SignalMessage`]s and tells the caller
//! what to do with incoming ones. The session never touches the peer
//! connection itself.

use mshb_shared::protocol::{IceCandidate, SignalMessage};
use mshb_shared::types::UserId;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Idle,
    OfferSent,
    OfferReceived,
    AnswerExchanged,
    Connected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingAction {
    /// Apply the remote offer and reply with an answer. `restart` is set
    /// when our own outstanding offer was discarded to resolve glare, so the
    /// connection that produced it must be replaced first.
    CreateAnswer { sdp: String, restart: bool },
    /// Apply the remote answer to our offer.
    ApplyAnswer(String),
    AddIceCandidate(IceCandidate),
    Close,
    Ignore,
}

pub struct SignalingSession {
    pub local_user: UserId,
    pub remote_user: UserId,
    pub state: SignalingState,
    pub local_sdp: Option<String>,
    pub remote_sdp: Option<String>,
    remote_description_applied: bool,
    pending_candidates: Vec<IceCandidate>,
}

impl SignalingSession {
    pub fn new(local_user: UserId, remote_user: UserId) -> Self {
        Self {
            local_user,
            remote_user,
            state: SignalingState::Idle,
            local_sdp: None,
            remote_sdp: None,
            remote_description_applied: false,
            pending_candidates: Vec::new(),
        }
    }

    /// The polite side of a pair yields when both sides offer at once.
    pub fn is_polite(&self) -> bool {
        self.local_user < self.remote_user
    }

    pub fn create_offer(&mut self, sdp: String) -> SignalMessage {
        self.local_sdp = Some(sdp.clone());
        self.state = SignalingState::OfferSent;
        debug!(remote = %self.remote_user.short(), "Creating SDP offer");

        SignalMessage::offer(self.local_user, self.remote_user, sdp)
    }

    pub fn create_answer(&mut self, sdp: String) -> SignalMessage {
        self.local_sdp = Some(sdp.clone());
        self.state = SignalingState::AnswerExchanged;
        debug!(remote = %self.remote_user.short(), "Creating SDP answer");

        SignalMessage::answer(self.local_user, self.remote_user, sdp)
    }

    pub fn local_candidate(&self, candidate: IceCandidate) -> SignalMessage {
        SignalMessage::ice(self.local_user, self.remote_user, candidate)
    }

    pub fn handle_signal(&mut self, signal: &SignalMessage) -> SignalingAction {
        match signal {
            SignalMessage::Offer(p) => match self.state {
                SignalingState::Idle | SignalingState::OfferReceived => {
                    self.accept_offer(&p.sdp, false)
                }
                SignalingState::OfferSent if self.is_polite() => {
                    debug!(remote = %self.remote_user.short(), "Offer glare, yielding");
                    self.local_sdp = None;
                    self.remote_description_applied = false;
                    self.accept_offer(&p.sdp, true)
                }
                SignalingState::OfferSent => {
                    debug!(remote = %self.remote_user.short(), "Offer glare, keeping our offer");
                    SignalingAction::Ignore
                }
                state => {
                    debug!(remote = %self.remote_user.short(), ?state, "Ignoring offer");
                    SignalingAction::Ignore
                }
            },

            SignalMessage::Answer(p) => {
                if self.state != SignalingState::OfferSent {
                    debug!(remote = %self.remote_user.short(), state = ?self.state, "Ignoring unexpected answer");
                    return SignalingAction::Ignore;
                }
                self.remote_sdp = Some(p.sdp.clone());
                self.state = SignalingState::AnswerExchanged;
                debug!(from = %p.sender_id.short(), "Received SDP answer");
                SignalingAction::ApplyAnswer(p.sdp.clone())
            }

            SignalMessage::Ice(p) => {
                if self.state == SignalingState::Closed {
                    return SignalingAction::Ignore;
                }
                if self.remote_description_applied {
                    SignalingAction::AddIceCandidate(p.candidate.clone())
                } else {
                    debug!(from = %p.sender_id.short(), queued = self.pending_candidates.len() + 1, "Queueing early ICE candidate");
                    self.pending_candidates.push(p.candidate.clone());
                    SignalingAction::Ignore
                }
            }

            SignalMessage::Leave(p) => {
                self.state = SignalingState::Closed;
                debug!(from = %p.user_id.short(), "Received leave");
                SignalingAction::Close
            }
        }
    }

    /// Record that the remote description is now set on the connection and
    /// return the candidates that arrived before it.
    pub fn remote_description_applied(&mut self) -> Vec<IceCandidate> {
        self.remote_description_applied = true;
        std::mem::take(&mut self.pending_candidates)
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn mark_connected(&mut self) {
        if self.state != SignalingState::Closed {
            self.state = SignalingState::Connected;
        }
    }

    pub fn close(&mut self) {
        self.state = SignalingState::Closed;
        self.pending_candidates.clear();
    }

    fn accept_offer(&mut self, sdp: &str, restart: bool) -> SignalingAction {
        self.remote_sdp = Some(sdp.to_string());
        self.state = SignalingState::OfferReceived;
        debug!(remote = %self.remote_user.short(), restart, "Received SDP offer");
        SignalingAction::CreateAnswer {
            sdp: sdp.to_string(),
            restart,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ordered_pair() -> (UserId, UserId) {
        let a = UserId::new();
        let b = UserId::new();
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }

    #[test]
    fn offerer_flow() {
        let (me, them) = ordered_pair();
        let mut s = SignalingSession::new(me, them);

        let offer = s.create_offer("v=0 offer".into());
        assert_eq!(offer.target(), Some(them));
        assert_eq!(s.state, SignalingState::OfferSent);

        let action = s.handle_signal(&SignalMessage::answer(them, me, "v=0 answer".into()));
        assert_eq!(action, SignalingAction::ApplyAnswer("v=0 answer".into()));
        assert_eq!(s.state, SignalingState::AnswerExchanged);

        s.mark_connected();
        assert_eq!(s.state, SignalingState::Connected);
    }

    #[test]
    fn answerer_flow() {
        let (me, them) = ordered_pair();
        let mut s = SignalingSession::new(me, them);

        let action = s.handle_signal(&SignalMessage::offer(them, me, "o".into()));
        assert_eq!(
            action,
            SignalingAction::CreateAnswer {
                sdp: "o".into(),
                restart: false
            }
        );
        let answer = s.create_answer("a".into());
        assert_eq!(answer.event_name(), "answer");
        assert_eq!(s.state, SignalingState::AnswerExchanged);
    }

    #[test]
    fn early_candidates_are_queued_until_remote_description() {
        let (me, them) = ordered_pair();
        let mut s = SignalingSession::new(me, them);
        s.create_offer("o".into());

        let ice = SignalMessage::ice(them, me, IceCandidate::new("candidate:1"));
        assert_eq!(s.handle_signal(&ice), SignalingAction::Ignore);
        assert_eq!(s.pending_candidates(), 1);

        s.handle_signal(&SignalMessage::answer(them, me, "a".into()));
        let flushed = s.remote_description_applied();
        assert_eq!(flushed, vec![IceCandidate::new("candidate:1")]);

        let ice2 = SignalMessage::ice(them, me, IceCandidate::new("candidate:2"));
        assert_eq!(
            s.handle_signal(&ice2),
            SignalingAction::AddIceCandidate(IceCandidate::new("candidate:2"))
        );
    }

    #[test]
    fn glare_polite_side_yields() {
        let (low, high) = ordered_pair();
        let mut polite = SignalingSession::new(low, high);
        let mut impolite = SignalingSession::new(high, low);
        assert!(polite.is_polite());
        assert!(!impolite.is_polite());

        polite.create_offer("from-low".into());
        impolite.create_offer("from-high".into());

        let at_polite = polite.handle_signal(&SignalMessage::offer(high, low, "from-high".into()));
        assert_eq!(
            at_polite,
            SignalingAction::CreateAnswer {
                sdp: "from-high".into(),
                restart: true
            }
        );

        let at_impolite = impolite.handle_signal(&SignalMessage::offer(low, high, "from-low".into()));
        assert_eq!(at_impolite, SignalingAction::Ignore);
        assert_eq!(impolite.state, SignalingState::OfferSent);
    }

    #[test]
    fn leave_closes_and_late_messages_ignored() {
        let (me, them) = ordered_pair();
        let mut s = SignalingSession::new(me, them);
        s.create_offer("o".into());

        assert_eq!(s.handle_signal(&SignalMessage::leave(them)), SignalingAction::Close);
        assert_eq!(s.state, SignalingState::Closed);
        assert_eq!(
            s.handle_signal(&SignalMessage::answer(them, me, "a".into())),
            SignalingAction::Ignore
        );
        assert_eq!(
            s.handle_signal(&SignalMessage::ice(them, me, IceCandidate::new("c"))),
            SignalingAction::Ignore
        );
    }

    #[test]
    fn no_renegotiation_after_exchange() {
        let (me, them) = ordered_pair();
        let mut s = SignalingSession::new(me, them);
        s.handle_signal(&SignalMessage::offer(them, me, "o".into()));
        s.create_answer("a".into());

        assert_eq!(
            s.handle_signal(&SignalMessage::offer(them, me, "o2".into())),
            SignalingAction::Ignore
        );
    }
}
