use crate::config::default_ice_servers;
use crate::error::{Error, Result};
use crate::peer::media::{LocalTrack, RemoteTrackInfo};
use crate::peer::types::{ConnectivityState, IceCandidate, SdpKind, ServerConfig, SessionDescription, TrackKind};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Asynchronous events raised by a peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Local ICE gathering produced a candidate
    LocalCandidate(IceCandidate),
    /// Local ICE gathering finished (null candidate)
    GatheringComplete,
    /// ICE connectivity changed
    Connectivity(ConnectivityState),
    /// A remote media track arrived
    RemoteTrack(RemoteTrackInfo),
    /// A remote stream stopped delivering media
    StreamEnded(String),
}

pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// Peer connection capability driven by the negotiation engine
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create an offer; `ice_restart` asks for fresh ICE credentials
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attach a local track for sending
    async fn add_track(&self, track: LocalTrack) -> Result<()>;

    /// Ask to receive one track of `kind` without sending one
    async fn add_receiver(&self, kind: TrackKind) -> Result<()>;

    /// Renegotiate connectivity; yields the restart offer to send
    async fn restart_ice(&self) -> Result<SessionDescription> {
        self.create_offer(true).await
    }

    async fn close(&self) -> Result<()>;
}

/// [`PeerConnection`] backed by webrtc-rs
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeer {
    /// Build the peer and wire its callbacks into a [`PeerEvent`] stream
    pub async fn new(servers: &[ServerConfig]) -> Result<(Self, PeerEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(servers))
                .await
                .map_err(|e| Error::PeerConnection(format!("Failed to create peer connection: {e}")))?,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        attach_handlers(&pc, tx);
        Ok((Self { pc }, rx))
    }
}

fn attach_handlers(pc: &Arc<RTCPeerConnection>, tx: mpsc::UnboundedSender<PeerEvent>) {
    let candidate_tx = tx.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let event = match cand {
            Some(c) => match c.to_json() {
                Ok(init) => Some(PeerEvent::LocalCandidate(from_candidate_init(init))),
                Err(e) => {
                    warn!("Dropping local candidate that does not serialize: {e}");
                    None
                }
            },
            // cand == None means gathering is over
            None => Some(PeerEvent::GatheringComplete),
        };
        if let Some(event) = event {
            let _ = candidate_tx.send(event);
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let state_tx = tx.clone();
    pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
        debug!("ICE connection state changed to: {:?}", st);
        if let Some(state) = map_connectivity(st) {
            let _ = state_tx.send(PeerEvent::Connectivity(state));
        }
        Box::pin(async {})
    }));

    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        debug!("Peer connection state changed to: {:?}", st);
        Box::pin(async {})
    }));

    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let track_tx = tx.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                RTPCodecType::Video => TrackKind::Video,
                RTPCodecType::Unspecified => {
                    warn!("Ignoring remote track of unspecified kind");
                    return;
                }
            };
            let info = RemoteTrackInfo {
                id: track.id().to_string(),
                stream_id: track.stream_id().to_string(),
                kind,
            };
            info!("Remote {} track {} on stream {}", info.kind, info.id, info.stream_id);
            let _ = track_tx.send(PeerEvent::RemoteTrack(info.clone()));

            // the stream counts as ended once its track stops delivering
            tokio::spawn(async move {
                while track.read_rtp().await.is_ok() {}
                debug!("Remote track {} stopped", info.id);
                let _ = track_tx.send(PeerEvent::StreamEnded(info.stream_id));
            });
        })
    }));
}

fn map_connectivity(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCIceConnectionState::New => Some(ConnectivityState::New),
        RTCIceConnectionState::Checking => Some(ConnectivityState::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(ConnectivityState::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCIceConnectionState::Closed => Some(ConnectivityState::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}

/// Peer connection configuration for the given ICE servers
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let servers = if servers.is_empty() {
        default_ice_servers()
    } else {
        servers.to_vec()
    };

    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Converts configured servers into webrtc-rs ICE servers
pub fn get_user_ice_servers(servers: Vec<ServerConfig>) -> Vec<RTCIceServer> {
    servers
        .into_iter()
        .map(|config| {
            let url = add_ice_url_scheme(&config);

            RTCIceServer {
                urls: vec![url],
                username: config.username.unwrap_or_default(),
                credential: config.credential.unwrap_or_default(),
            }
        })
        .collect()
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(Error::Description(format!(
                "unsupported description type {other:?}"
            )))
        }
    };
    Ok(SessionDescription { kind, sdp: desc.sdp })
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    rtc.map_err(|e| Error::Description(format!("unparsable description: {e}")))
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self
            .pc
            .create_offer(options)
            .await
            .map_err(|e| Error::Description(format!("Failed to create offer: {e}")))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Description(format!("Failed to create answer: {e}")))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::Description(format!("Failed to set local description: {e}")))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::Description(format!("Failed to set remote description: {e}")))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_candidate_init(candidate))
            .await
            .map_err(|e| Error::IceCandidate(e.to_string()))
    }

    async fn add_track(&self, track: LocalTrack) -> Result<()> {
        let sender = self
            .pc
            .add_track(track.track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaAcquisition(format!("Failed to add {} track: {e}", track.kind)))?;

        // RTCP has to be read for the interceptors to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn add_receiver(&self, kind: TrackKind) -> Result<()> {
        let codec = match kind {
            TrackKind::Audio => RTPCodecType::Audio,
            TrackKind::Video => RTPCodecType::Video,
        };
        self.pc
            .add_transceiver_from_kind(
                codec,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to close peer connection: {e}")))
    }
}
