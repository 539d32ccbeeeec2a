use crate::peer::connection::PeerConnection;
use crate::peer::types::IceCandidate;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Remote candidates received before a remote description exists
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidate) {
        debug!("Remote description not set yet, queuing candidate");
        self.queue.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Applies every queued candidate in arrival order; returns how many were accepted
    pub async fn flush(&mut self, peer: &dyn PeerConnection) -> usize {
        if self.is_empty() {
            return 0;
        }
        debug!("Flushing {} pending candidate(s)", self.len());
        let mut applied = 0;
        for candidate in self.queue.drain(..) {
            debug!("Applying pending candidate: {}", candidate.candidate);
            match peer.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("Failed to apply pending candidate: {e}"),
            }
        }
        applied
    }
}

/// Candidate type counts, used to warn about NAT traversal trouble
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );

    if summary.relay == 0 {
        warn!("No TURN relay candidates found, connection through symmetric NAT may fail");
    }
    summary
}

/// One ICE restart per failure; a second failure while restarting is final
#[derive(Debug, Default)]
pub struct IceRecovery {
    started: Option<Instant>,
}

impl IceRecovery {
    /// Returns false when a restart is already running
    pub fn begin(&mut self) -> bool {
        if self.started.is_some() {
            return false;
        }
        self.started = Some(Instant::now());
        true
    }

    pub fn in_progress(&self) -> bool {
        self.started.is_some()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started
    }

    /// Connectivity came back; re-arms the restart
    pub fn succeed(&mut self) {
        self.started = None;
    }
}
