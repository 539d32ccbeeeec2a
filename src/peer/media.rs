//! Media capture and the role-specific halves of a session
//!
//! The broadcaster acquires a capture and attaches every track before it
//! describes itself; the viewer only receives, and exposes the first remote
//! stream to its caller.

use crate::error::{Error, Result};
use crate::peer::connection::PeerConnection;
use crate::peer::envelope::Signal;
use crate::peer::types::{Role, TrackKind};
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Resolution and frame rate hints for the video capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoHints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub ideal_frame_rate: u32,
}

impl Default for VideoHints {
    // highest quality the capture can offer
    fn default() -> Self {
        Self {
            ideal_width: 4096,
            ideal_height: 2160,
            ideal_frame_rate: 144,
        }
    }
}

/// What the broadcaster asks its capture for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub video: Option<VideoHints>,
    pub audio: bool,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            video: Some(VideoHints::default()),
            audio: true,
        }
    }
}

/// A local track attached to the peer connection
#[derive(Clone)]
pub struct LocalTrack {
    pub kind: TrackKind,
    pub track: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn stream_id(&self) -> &str {
        self.track.stream_id()
    }

    /// Push one encoded frame to the remote side
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        self.track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.id())
            .field("stream_id", &self.stream_id())
            .finish()
    }
}

/// Produces local media tracks for a capture request
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self, request: &CaptureRequest) -> Result<Vec<LocalTrack>>;
}

/// Capture backed by sample tracks (VP8 video, Opus audio)
///
/// The tracks carry no frames on their own; whoever grabs the screen writes
/// encoded samples through [`LocalTrack::write_sample`].
#[derive(Debug, Default, Clone)]
pub struct SampleCapture;

#[async_trait]
impl MediaCapture for SampleCapture {
    async fn acquire(&self, request: &CaptureRequest) -> Result<Vec<LocalTrack>> {
        let stream_id = format!("screen-{}", random_id());
        let mut tracks = Vec::new();

        if let Some(hints) = request.video {
            debug!(
                "Capturing video at up to {}x{}@{}",
                hints.ideal_width, hints.ideal_height, hints.ideal_frame_rate
            );
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                "video".to_owned(),
                stream_id.clone(),
            ));
            tracks.push(LocalTrack {
                kind: TrackKind::Video,
                track,
            });
        }

        if request.audio {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                "audio".to_owned(),
                stream_id.clone(),
            ));
            tracks.push(LocalTrack {
                kind: TrackKind::Audio,
                track,
            });
        }

        if tracks.is_empty() {
            return Err(Error::MediaAcquisition(
                "capture request asks for neither video nor audio".into(),
            ));
        }
        Ok(tracks)
    }
}

/// Remote track as reported by the peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Remote tracks bundled under one stream id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<RemoteTrackInfo>,
}

/// Role-specific behaviour plugged into the negotiation engine
#[async_trait]
pub trait RoleBehavior: Send + Sync {
    fn role(&self) -> Role;

    /// Signal sent as soon as the session opens
    fn opening_signal(&self) -> Option<Signal>;

    /// Runs once when the session opens
    async fn prepare(&mut self, peer: &dyn PeerConnection) -> Result<()>;

    /// Runs right before this side authors an offer
    async fn prepare_offer(&mut self, _peer: &dyn PeerConnection) -> Result<()> {
        Ok(())
    }

    /// Record a remote track; returns the stream to expose when it changed
    fn on_remote_track(&mut self, _track: RemoteTrackInfo) -> Option<RemoteStream> {
        None
    }

    fn remote_stream(&self) -> Option<&RemoteStream> {
        None
    }

    /// Drop everything acquired in `prepare`
    fn release(&mut self) {}
}

/// Media source side
pub struct Broadcaster {
    capture: Arc<dyn MediaCapture>,
    request: CaptureRequest,
    tracks: Vec<LocalTrack>,
}

impl Broadcaster {
    pub fn new(capture: Arc<dyn MediaCapture>, request: CaptureRequest) -> Self {
        Self {
            capture,
            request,
            tracks: Vec::new(),
        }
    }
}

#[async_trait]
impl RoleBehavior for Broadcaster {
    fn role(&self) -> Role {
        Role::Broadcaster
    }

    fn opening_signal(&self) -> Option<Signal> {
        None
    }

    async fn prepare(&mut self, peer: &dyn PeerConnection) -> Result<()> {
        if !self.tracks.is_empty() {
            return Ok(());
        }

        let tracks = self.capture.acquire(&self.request).await.map_err(|e| match e {
            Error::MediaAcquisition(_) => e,
            other => Error::MediaAcquisition(other.to_string()),
        })?;
        if tracks.is_empty() {
            return Err(Error::MediaAcquisition("no media to broadcast".into()));
        }

        for track in &tracks {
            peer.add_track(track.clone()).await?;
            debug!("Attached {} track {}", track.kind, track.id());
        }
        info!("Broadcasting {} local track(s)", tracks.len());
        self.tracks = tracks;
        Ok(())
    }

    fn release(&mut self) {
        self.tracks.clear();
    }
}

/// Media sink side
#[derive(Default)]
pub struct Viewer {
    receivers_added: bool,
    stream: Option<RemoteStream>,
}

impl Viewer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleBehavior for Viewer {
    fn role(&self) -> Role {
        Role::Viewer
    }

    fn opening_signal(&self) -> Option<Signal> {
        Some(Signal::OfferRequest)
    }

    async fn prepare(&mut self, _peer: &dyn PeerConnection) -> Result<()> {
        Ok(())
    }

    // receive-only transceivers so an offer authored here still asks for media
    async fn prepare_offer(&mut self, peer: &dyn PeerConnection) -> Result<()> {
        if self.receivers_added {
            return Ok(());
        }
        peer.add_receiver(TrackKind::Video).await?;
        peer.add_receiver(TrackKind::Audio).await?;
        self.receivers_added = true;
        Ok(())
    }

    fn on_remote_track(&mut self, track: RemoteTrackInfo) -> Option<RemoteStream> {
        match &mut self.stream {
            None => {
                self.stream = Some(RemoteStream {
                    id: track.stream_id.clone(),
                    tracks: vec![track],
                });
            }
            Some(stream) if stream.id == track.stream_id => {
                if stream.tracks.iter().any(|t| t.id == track.id) {
                    return None;
                }
                stream.tracks.push(track);
            }
            Some(stream) => {
                debug!(
                    "Ignoring track {} of stream {}, already showing {}",
                    track.id, track.stream_id, stream.id
                );
                return None;
            }
        }
        self.stream.clone()
    }

    fn remote_stream(&self) -> Option<&RemoteStream> {
        self.stream.as_ref()
    }

    fn release(&mut self) {
        self.stream = None;
    }
}
