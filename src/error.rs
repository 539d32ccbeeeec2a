//! Error types for signaling and negotiation

use std::fmt;

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening a session or negotiating it
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Signaling channel could not be opened, or failed while in use
    #[error("Signaling transport error: {0}")]
    Transport(String),

    /// Broadcaster could not obtain a local capture
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Session description could not be created or was rejected
    #[error("Session description error: {0}")]
    Description(String),

    /// A single ICE candidate was rejected by the peer connection
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// ICE restart did not bring connectivity back
    #[error("Connectivity lost: {0}")]
    Connectivity(String),

    /// Envelope or payload JSON did not parse
    #[error("Malformed signal: {0}")]
    MalformedSignal(String),

    /// Envelope carried an event tag this protocol does not know
    #[error("Unknown signal event: {0}")]
    UnknownEvent(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Peer connection construction or teardown error
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error ends the session.
    ///
    /// Bad input from the channel and single rejected candidates are absorbed;
    /// everything else is terminal and surfaces as a disconnect.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::MalformedSignal(_) | Error::UnknownEvent(_) | Error::IceCandidate(_)
        )
    }
}

/// Why a session ended, carried by the single user-visible disconnect notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Signaling channel closed, locally or by the remote end
    TransportClosed(Option<String>),
    /// Signaling channel reported an error
    TransportError(String),
    /// Negotiation hit a terminal error
    Fatal(String),
    /// The remote media stream ended
    StreamEnded,
    /// ICE restart did not converge
    RecoveryFailed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::TransportClosed(Some(reason)) => {
                write!(f, "signaling channel closed: {reason}")
            }
            DisconnectReason::TransportClosed(None) => write!(f, "signaling channel closed"),
            DisconnectReason::TransportError(reason) => {
                write!(f, "signaling channel error: {reason}")
            }
            DisconnectReason::Fatal(reason) => write!(f, "{reason}"),
            DisconnectReason::StreamEnded => write!(f, "remote stream ended"),
            DisconnectReason::RecoveryFailed => write!(f, "connection recovery failed"),
        }
    }
}
