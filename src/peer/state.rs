use std::fmt;
use std::time::Duration;

/// Negotiation progress of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// Constructed, nothing exchanged yet
    Idle,
    /// Description exchange under way
    Negotiating,
    /// Descriptions exchanged and connectivity up
    Connected,
    /// ICE restart in progress after connectivity failed
    Recovering,
    /// Terminal
    Ended,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        self == NegotiationState::Ended
    }

    /// States in which a connectivity failure triggers an ICE restart
    pub fn can_recover(self) -> bool {
        matches!(
            self,
            NegotiationState::Negotiating | NegotiationState::Connected
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Connected => "connected",
            NegotiationState::Recovering => "recovering",
            NegotiationState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// ========== CONSTANTS ==========

/// How long an ICE restart may take before the session is given up
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);
