pub mod connection;
pub mod engine;
pub mod envelope;
pub mod ice;
pub mod media;
pub mod state;
pub mod types;

pub use connection::{PeerConnection, PeerEvent, PeerEvents, RtcPeer};
pub use engine::NegotiationEngine;
pub use envelope::{Envelope, Signal};
pub use media::{
    Broadcaster, CaptureRequest, LocalTrack, MediaCapture, RemoteStream, RemoteTrackInfo,
    RoleBehavior, SampleCapture, VideoHints, Viewer,
};
pub use state::NegotiationState;
pub use types::{ConnectivityState, IceCandidate, Role, SdpKind, ServerConfig, SessionDescription, TrackKind};
