use crate::config::default_log_filter;
use crate::error::DisconnectReason;
use crate::peer::media::RemoteStream;
use crate::peer::types::IceCandidate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `filter`, which takes precedence over the
/// build default. Calling it twice is harmless.
pub fn init_tracing(filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter.unwrap_or(default_log_filter())))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Logs an ICE candidate as it trickles in or out
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

/// User-visible session notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    /// Connectivity failed, an ICE restart is being attempted
    Recovering,
    Recovered,
    /// Remote media arrived (viewer)
    RemoteStream(RemoteStream),
    /// The session is over; sent exactly once
    Disconnected(DisconnectReason),
}

/// Delivers [`SessionEvent`]s to whoever shows them to the user
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
    disconnected: Arc<AtomicBool>,
}

impl Notifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            tx: Some(tx),
            disconnected: Arc::new(AtomicBool::new(false)),
        };
        (notifier, rx)
    }

    /// Notifier that only logs
    pub fn silent() -> Self {
        Self {
            tx: None,
            disconnected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn emit_state(&self, event: SessionEvent) {
        debug!("emit_state called with event: {:?}", event);
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Nobody is listening for session events");
            }
        }
    }

    pub fn emit_connected(&self) {
        info!("Peer connected");
        self.emit_state(SessionEvent::Connected);
    }

    pub fn emit_connection_recovering(&self) {
        warn!("Connectivity failed, restarting ICE");
        self.emit_state(SessionEvent::Recovering);
    }

    pub fn emit_connection_recovered(&self) {
        info!("Connection recovered");
        self.emit_state(SessionEvent::Recovered);
    }

    pub fn emit_remote_stream(&self, stream: RemoteStream) {
        info!(
            "Remote stream {} with {} track(s)",
            stream.id,
            stream.tracks.len()
        );
        self.emit_state(SessionEvent::RemoteStream(stream));
    }

    /// Fires the disconnect notice; later calls are ignored
    pub fn emit_disconnected(&self, reason: DisconnectReason) -> bool {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            debug!("Already disconnected, dropping second notice ({reason})");
            return false;
        }
        warn!("Disconnected: {reason}");
        self.emit_state(SessionEvent::Disconnected(reason));
        true
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}
