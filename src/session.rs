//! One screen sharing session: a signaling channel driving a negotiation engine

use crate::config::SessionConfig;
use crate::error::{DisconnectReason, Error, Result};
use crate::logger::Notifier;
use crate::peer::connection::{PeerEvent, PeerEvents, RtcPeer};
use crate::peer::engine::NegotiationEngine;
use crate::peer::envelope::{self, Signal};
use crate::peer::media::{MediaCapture, RemoteStream};
use crate::peer::state::{NegotiationState, GRACE_PERIOD};
use crate::peer::types::Role;
use crate::signaling::{ChannelEvent, SignalingChannel};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub role: Role,
    /// Negotiation state when the session stopped
    pub final_state: NegotiationState,
    pub reason: DisconnectReason,
    pub remote_stream: Option<RemoteStream>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

pub struct Session {
    session_id: String,
    channel: SignalingChannel,
    engine: NegotiationEngine,
    peer_events: PeerEvents,
    notifier: Notifier,
    recovery_grace: Duration,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        channel: SignalingChannel,
        engine: NegotiationEngine,
        peer_events: PeerEvents,
        notifier: Notifier,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            channel,
            engine,
            peer_events,
            notifier,
            recovery_grace: GRACE_PERIOD,
        }
    }

    pub fn with_recovery_grace(mut self, grace: Duration) -> Self {
        self.recovery_grace = grace;
        self
    }

    /// Runs the session until the channel closes or negotiation ends.
    ///
    /// Inbound envelopes and peer events are handled one at a time, each to
    /// completion. On the way out the peer connection is released and the
    /// disconnect notice fires exactly once.
    pub async fn run(mut self) -> SessionReport {
        let started_at = Utc::now();
        let role = self.engine.role();
        info!("Session {} started as {}", self.session_id, role);

        let reason = self.drive().await;

        let final_state = self.engine.state();
        let remote_stream = self.engine.remote_stream().cloned();
        self.engine.release().await;
        self.channel.close();
        self.notifier.emit_disconnected(reason.clone());
        info!(
            "Session {} ended in state {}: {}",
            self.session_id, final_state, reason
        );

        SessionReport {
            session_id: self.session_id,
            role,
            final_state,
            reason,
            remote_stream,
            started_at,
            ended_at: Utc::now(),
        }
    }

    async fn drive(&mut self) -> DisconnectReason {
        match self.engine.start().await {
            Ok(Some(signal)) => self.channel.send(&signal),
            Ok(None) => {}
            Err(e) => {
                error!("Session could not start: {e}");
                return self.end_reason(e);
            }
        }

        loop {
            let deadline = self
                .engine
                .recovery_started_at()
                .map(|started| started + self.recovery_grace);

            tokio::select! {
                event = self.channel.recv() => match event {
                    Some(ChannelEvent::Message(text)) => self.dispatch(&text).await,
                    Some(ChannelEvent::Closed(reason)) => {
                        return DisconnectReason::TransportClosed(reason)
                    }
                    Some(ChannelEvent::Error(e)) => return DisconnectReason::TransportError(e),
                    None => return DisconnectReason::TransportClosed(None),
                },
                Some(event) = self.peer_events.recv() => self.on_peer_event(event).await,
                _ = recovery_deadline(deadline) => self.engine.abandon_recovery(),
            }

            if let Some(reason) = self.engine.end_reason() {
                return reason.clone();
            }
        }
    }

    async fn dispatch(&mut self, text: &str) {
        let signal = match envelope::decode(text) {
            Ok(signal) => signal,
            Err(Error::UnknownEvent(event)) => {
                warn!("Invalid message: unknown event '{event}'");
                return;
            }
            Err(e) => {
                warn!("Dropping signal: {e}");
                return;
            }
        };

        let result = self.engine.handle_signal(signal).await;
        self.forward(result);
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        let result = self.engine.handle_peer_event(event).await;
        self.forward(result);
    }

    fn forward(&mut self, result: Result<Option<Signal>>) {
        match result {
            Ok(Some(signal)) => {
                debug!("Sending {}", signal.event());
                self.channel.send(&signal);
            }
            Ok(None) => {}
            Err(e) if !e.is_fatal() => warn!("Ignoring signal: {e}"),
            Err(e) => error!("Negotiation failed: {e}"),
        }
    }

    fn end_reason(&self, e: Error) -> DisconnectReason {
        self.engine
            .end_reason()
            .cloned()
            .unwrap_or_else(|| DisconnectReason::Fatal(e.to_string()))
    }
}

async fn recovery_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Opens the signaling channel and a webrtc-rs peer for `config`, then runs
/// the session to completion
pub async fn run_session(
    config: SessionConfig,
    capture: Arc<dyn MediaCapture>,
    notifier: Notifier,
) -> Result<SessionReport> {
    config.validate()?;

    let channel =
        match SignalingChannel::open(&config.signaling_url, &config.session_id, config.role).await {
            Ok(channel) => channel,
            Err(e) => {
                notifier.emit_disconnected(DisconnectReason::TransportError(e.to_string()));
                return Err(e);
            }
        };

    let (peer, events) = match RtcPeer::new(&config.effective_ice_servers()).await {
        Ok(built) => built,
        Err(e) => {
            notifier.emit_disconnected(DisconnectReason::Fatal(e.to_string()));
            return Err(e);
        }
    };

    let engine = match config.role {
        Role::Broadcaster => NegotiationEngine::broadcaster(
            capture,
            config.capture.clone(),
            Box::new(peer),
            notifier.clone(),
        ),
        Role::Viewer => NegotiationEngine::viewer(Box::new(peer), notifier.clone()),
    };

    let session = Session::new(config.session_id, channel, engine, events, notifier)
        .with_recovery_grace(config.recovery_grace);
    Ok(session.run().await)
}
