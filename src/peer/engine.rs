//! Negotiation engine
//!
//! Owns the session's peer connection and turns inbound signals and peer
//! events into description/candidate operations plus outbound signals. Every
//! call runs to completion before the next one starts; the caller is expected
//! to drive the engine from a single loop.
//!
//! Handlers are the same for both roles: whichever side receives
//! `offer-request` authors the offer, whichever side receives `offer` answers
//! it. Role differences live behind [`RoleBehavior`].

use crate::error::{DisconnectReason, Error, Result};
use crate::logger::{dump_candidate, Notifier};
use crate::peer::connection::{PeerConnection, PeerEvent};
use crate::peer::envelope::Signal;
use crate::peer::ice::{analyze_candidates, IceRecovery, PendingCandidates};
use crate::peer::media::{Broadcaster, CaptureRequest, MediaCapture, RemoteStream, RoleBehavior, Viewer};
use crate::peer::state::NegotiationState;
use crate::peer::types::{ConnectivityState, IceCandidate, Role, SdpKind, SessionDescription};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct NegotiationEngine {
    behavior: Box<dyn RoleBehavior>,
    peer: Box<dyn PeerConnection>,
    notifier: Notifier,
    state: NegotiationState,
    end_reason: Option<DisconnectReason>,
    has_local: bool,
    has_remote: bool,
    /// We sent an offer that has not been answered yet
    offer_outstanding: bool,
    /// We authored the offer of the current description pair
    offerer: bool,
    pending: PendingCandidates,
    recovery: IceRecovery,
    local_candidates: Vec<IceCandidate>,
    released: bool,
}

impl NegotiationEngine {
    pub fn new(
        behavior: Box<dyn RoleBehavior>,
        peer: Box<dyn PeerConnection>,
        notifier: Notifier,
    ) -> Self {
        Self {
            behavior,
            peer,
            notifier,
            state: NegotiationState::Idle,
            end_reason: None,
            has_local: false,
            has_remote: false,
            offer_outstanding: false,
            offerer: false,
            pending: PendingCandidates::default(),
            recovery: IceRecovery::default(),
            local_candidates: Vec::new(),
            released: false,
        }
    }

    pub fn broadcaster(
        capture: Arc<dyn MediaCapture>,
        request: CaptureRequest,
        peer: Box<dyn PeerConnection>,
        notifier: Notifier,
    ) -> Self {
        Self::new(Box::new(Broadcaster::new(capture, request)), peer, notifier)
    }

    pub fn viewer(peer: Box<dyn PeerConnection>, notifier: Notifier) -> Self {
        Self::new(Box::new(Viewer::new()), peer, notifier)
    }

    pub fn role(&self) -> Role {
        self.behavior.role()
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Why the engine reached `Ended`, if it did
    pub fn end_reason(&self) -> Option<&DisconnectReason> {
        self.end_reason.as_ref()
    }

    /// Remote stream exposed to the caller (viewer only)
    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.behavior.remote_stream()
    }

    /// When the running ICE restart began
    pub fn recovery_started_at(&self) -> Option<Instant> {
        if self.state == NegotiationState::Recovering {
            self.recovery.started_at()
        } else {
            None
        }
    }

    /// Remote candidates waiting for a remote description
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Prepares the role and returns the signal that opens the session
    pub async fn start(&mut self) -> Result<Option<Signal>> {
        info!("Starting negotiation as {}", self.role());
        let result = self.behavior.prepare(self.peer.as_ref()).await;
        self.check(result)?;
        Ok(self.behavior.opening_signal())
    }

    /// Applies one inbound signal; returns the reply to send, if any
    pub async fn handle_signal(&mut self, signal: Signal) -> Result<Option<Signal>> {
        if self.state.is_terminal() {
            debug!("Session ended, ignoring {}", signal.event());
            return Ok(None);
        }

        let result = match signal {
            Signal::OfferRequest => self.on_offer_request().await,
            Signal::Offer(desc) => self.on_offer(desc).await,
            Signal::Answer(desc) => self.on_answer(desc).await,
            Signal::Ice(candidate) => self.on_remote_candidate(candidate).await.map(|_| None),
        };
        self.check(result)
    }

    /// Applies one peer connection event; returns the signal to send, if any
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<Option<Signal>> {
        if self.state.is_terminal() {
            debug!("Session ended, ignoring peer event {:?}", event);
            return Ok(None);
        }

        let result = match event {
            PeerEvent::LocalCandidate(candidate) => {
                dump_candidate("LOCAL", &candidate);
                self.local_candidates.push(candidate.clone());
                Ok(Some(Signal::Ice(candidate)))
            }
            PeerEvent::GatheringComplete => {
                debug!("ICE candidate gathering completed (null candidate received)");
                analyze_candidates(&self.local_candidates);
                Ok(None)
            }
            PeerEvent::Connectivity(state) => self.on_connectivity(state).await,
            PeerEvent::RemoteTrack(track) => {
                match self.behavior.on_remote_track(track) {
                    Some(stream) => self.notifier.emit_remote_stream(stream),
                    None => debug!("Remote track not exposed by {}", self.role()),
                }
                Ok(None)
            }
            PeerEvent::StreamEnded(stream_id) => {
                if self.remote_stream().is_some_and(|s| s.id == stream_id) {
                    self.end(DisconnectReason::StreamEnded);
                }
                Ok(None)
            }
        };
        self.check(result)
    }

    /// Gives up a recovery that did not converge in time
    pub fn abandon_recovery(&mut self) {
        if self.state == NegotiationState::Recovering {
            warn!("ICE restart did not converge in time");
            self.end(DisconnectReason::RecoveryFailed);
        }
    }

    /// Closes the peer connection and drops local media.
    ///
    /// The negotiation state is left as it was so callers can tell how far
    /// the session got.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.behavior.release();
        self.pending.clear();
        if let Err(e) = self.peer.close().await {
            warn!("Failed to close peer connection: {e}");
        }
        debug!("Peer connection released in state {}", self.state);
    }

    async fn on_offer_request(&mut self) -> Result<Option<Signal>> {
        debug!("got offer-request");
        if self.state != NegotiationState::Idle {
            warn!("Ignoring offer-request in state {}", self.state);
            return Ok(None);
        }

        self.behavior.prepare(self.peer.as_ref()).await?;
        self.behavior.prepare_offer(self.peer.as_ref()).await?;

        let offer = self.peer.create_offer(false).await?;
        self.peer.set_local_description(offer.clone()).await?;
        self.has_local = true;
        self.offer_outstanding = true;
        self.offerer = true;
        self.transition(NegotiationState::Negotiating);
        debug!("sent offer");
        Ok(Some(Signal::Offer(offer)))
    }

    async fn on_offer(&mut self, offer: SessionDescription) -> Result<Option<Signal>> {
        debug!("got offer");
        if offer.kind != SdpKind::Offer {
            return Err(Error::MalformedSignal(format!(
                "offer event carries a {:?} description",
                offer.kind
            )));
        }
        if self.offer_outstanding {
            warn!("Ignoring offer that collides with our own outstanding offer");
            return Ok(None);
        }

        self.behavior.prepare(self.peer.as_ref()).await?;

        self.peer.set_remote_description(offer).await?;
        self.has_remote = true;
        self.pending.flush(self.peer.as_ref()).await;

        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;
        self.has_local = true;
        self.offerer = false;
        if self.state == NegotiationState::Idle {
            self.transition(NegotiationState::Negotiating);
        }
        debug!("sent answer");
        Ok(Some(Signal::Answer(answer)))
    }

    async fn on_answer(&mut self, answer: SessionDescription) -> Result<Option<Signal>> {
        debug!("got answer");
        if answer.kind != SdpKind::Answer {
            return Err(Error::MalformedSignal(format!(
                "answer event carries a {:?} description",
                answer.kind
            )));
        }
        if !self.offer_outstanding {
            warn!(
                "Ignoring answer in state {}: no local offer to answer",
                self.state
            );
            return Ok(None);
        }

        self.peer.set_remote_description(answer).await?;
        self.has_remote = true;
        self.offer_outstanding = false;
        self.pending.flush(self.peer.as_ref()).await;

        if self.state == NegotiationState::Negotiating {
            self.transition(NegotiationState::Connected);
            self.notifier.emit_connected();
        }
        Ok(None)
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        dump_candidate("REMOTE", &candidate);
        if !self.has_remote {
            self.pending.push(candidate);
            return Ok(());
        }
        // duplicates are applied again; a rejected candidate is not fatal
        if let Err(e) = self.peer.add_ice_candidate(candidate).await {
            warn!("Failed to add ICE candidate: {e}");
        }
        Ok(())
    }

    async fn on_connectivity(&mut self, connectivity: ConnectivityState) -> Result<Option<Signal>> {
        debug!("Connectivity {:?} in state {}", connectivity, self.state);
        match connectivity {
            ConnectivityState::Connected => {
                match self.state {
                    NegotiationState::Negotiating
                        if self.has_local && self.has_remote && !self.offer_outstanding =>
                    {
                        self.transition(NegotiationState::Connected);
                        self.notifier.emit_connected();
                    }
                    NegotiationState::Recovering => {
                        self.recovery.succeed();
                        self.transition(NegotiationState::Connected);
                        self.notifier.emit_connection_recovered();
                    }
                    _ => {}
                }
                Ok(None)
            }
            ConnectivityState::Failed => {
                if self.recovery.in_progress() {
                    return Err(Error::Connectivity("ICE restart did not converge".into()));
                }
                if !self.state.can_recover() || !self.recovery.begin() {
                    return Ok(None);
                }
                self.transition(NegotiationState::Recovering);
                self.notifier.emit_connection_recovering();

                if !self.offerer {
                    debug!("Waiting for the offering side to restart ICE");
                    return Ok(None);
                }
                let restart = self.peer.restart_ice().await?;
                self.peer.set_local_description(restart.clone()).await?;
                self.offer_outstanding = true;
                debug!("sent ICE restart offer");
                Ok(Some(Signal::Offer(restart)))
            }
            _ => Ok(None),
        }
    }

    fn transition(&mut self, next: NegotiationState) {
        if self.state != next {
            info!("Negotiation {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn end(&mut self, reason: DisconnectReason) {
        if self.state.is_terminal() {
            return;
        }
        self.transition(NegotiationState::Ended);
        self.end_reason = Some(reason);
    }

    /// Ends the session on fatal errors; everything else passes through
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                let reason = match e {
                    Error::Connectivity(_) => DisconnectReason::RecoveryFailed,
                    other => DisconnectReason::Fatal(other.to_string()),
                };
                self.end(reason);
            }
        }
        result
    }
}
