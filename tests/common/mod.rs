//! Scripted peer connection and capture doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use screenlink::peer::{
    CaptureRequest, ConnectivityState, IceCandidate, LocalTrack, MediaCapture, PeerConnection,
    PeerEvent, PeerEvents, RemoteTrackInfo, SampleCapture, SdpKind, SessionDescription, TrackKind,
};
use screenlink::{Error, Result, SessionEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything the fake peer was asked to do
#[derive(Debug, Default)]
pub struct PeerLog {
    pub calls: Vec<String>,
    pub offers_created: usize,
    pub answers_created: usize,
    pub restarts: usize,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
    pub tracks: Vec<TrackKind>,
    pub receivers: Vec<TrackKind>,
    pub closed: bool,
    connected_emitted: bool,
    gathered: bool,
}

/// Test-side handle on a [`FakePeer`]
#[derive(Clone)]
pub struct FakeHandle {
    log: Arc<Mutex<PeerLog>>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl FakeHandle {
    pub fn emit(&self, event: PeerEvent) {
        self.events.send(event).unwrap();
    }

    pub fn with_log<T>(&self, f: impl FnOnce(&PeerLog) -> T) -> T {
        f(&self.log.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_log(|l| l.calls.clone())
    }
}

/// In-process stand-in for a WebRTC peer connection.
///
/// Descriptions are `fake-<offer|answer> <name> tracks=<kinds>`; setting a
/// remote description with tracks raises one remote track per kind, setting
/// the local description trickles one host candidate, and once both
/// descriptions exist connectivity reports `Connected`.
pub struct FakePeer {
    name: String,
    log: Arc<Mutex<PeerLog>>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl FakePeer {
    pub fn new(name: &str) -> (Self, FakeHandle, PeerEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(PeerLog::default()));
        let peer = Self {
            name: name.to_string(),
            log: log.clone(),
            events: tx.clone(),
        };
        (peer, FakeHandle { log, events: tx }, rx)
    }

    fn record(&self, call: impl Into<String>) {
        self.log.lock().unwrap().calls.push(call.into());
    }

    fn describe(&self, kind: &str, restart: bool) -> String {
        let log = self.log.lock().unwrap();
        let tracks: Vec<String> = log.tracks.iter().map(|t| t.to_string()).collect();
        let mut sdp = format!("fake-{kind} {} tracks={}", self.name, tracks.join(","));
        if restart {
            sdp.push_str(" ice-restart");
        }
        sdp
    }

    fn maybe_connect(&self) {
        let mut log = self.log.lock().unwrap();
        if log.local.is_some() && log.remote.is_some() && !log.connected_emitted {
            log.connected_emitted = true;
            let _ = self
                .events
                .send(PeerEvent::Connectivity(ConnectivityState::Connected));
        }
    }
}

fn remote_tracks(sdp: &str) -> (String, Vec<TrackKind>) {
    let mut words = sdp.split_whitespace();
    let _kind = words.next();
    let name = words.next().unwrap_or_default().to_string();
    let kinds = words
        .find_map(|w| w.strip_prefix("tracks="))
        .unwrap_or_default()
        .split(',')
        .filter_map(|k| match k {
            "video" => Some(TrackKind::Video),
            "audio" => Some(TrackKind::Audio),
            _ => None,
        })
        .collect();
    (name, kinds)
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        self.record(if ice_restart { "create-offer:restart" } else { "create-offer" });
        self.log.lock().unwrap().offers_created += 1;
        Ok(SessionDescription::offer(self.describe("offer", ice_restart)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create-answer");
        if self.log.lock().unwrap().remote.is_none() {
            return Err(Error::Description("no remote offer to answer".into()));
        }
        self.log.lock().unwrap().answers_created += 1;
        Ok(SessionDescription::answer(self.describe("answer", false)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(format!("set-local:{:?}", desc.kind));
        let first = {
            let mut log = self.log.lock().unwrap();
            log.local = Some(desc);
            !std::mem::replace(&mut log.gathered, true)
        };
        if first {
            let _ = self.events.send(PeerEvent::LocalCandidate(IceCandidate {
                candidate: format!("candidate:1 1 udp 2122260223 10.0.0.{} 50000 typ host", self.name.len()),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: Some(self.name.clone()),
            }));
            let _ = self.events.send(PeerEvent::GatheringComplete);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(format!("set-remote:{:?}", desc.kind));
        if !desc.sdp.starts_with("fake-") {
            return Err(Error::Description(format!("cannot parse '{}'", desc.sdp)));
        }
        {
            let log = self.log.lock().unwrap();
            let local_offer = log.local.as_ref().is_some_and(|l| l.kind == SdpKind::Offer);
            if desc.kind == SdpKind::Answer && !local_offer {
                return Err(Error::Description("answer without local offer".into()));
            }
        }

        let (remote_name, kinds) = remote_tracks(&desc.sdp);
        let first = {
            let mut log = self.log.lock().unwrap();
            let first = log.remote.is_none();
            log.remote = Some(desc);
            first
        };
        if first {
            for kind in kinds {
                let _ = self.events.send(PeerEvent::RemoteTrack(RemoteTrackInfo {
                    id: kind.to_string(),
                    stream_id: format!("stream-{remote_name}"),
                    kind,
                }));
            }
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record("add-ice");
        let mut log = self.log.lock().unwrap();
        if log.remote.is_none() {
            return Err(Error::IceCandidate("no remote description".into()));
        }
        log.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: LocalTrack) -> Result<()> {
        self.record(format!("add-track:{}", track.kind));
        self.log.lock().unwrap().tracks.push(track.kind);
        Ok(())
    }

    async fn add_receiver(&self, kind: TrackKind) -> Result<()> {
        self.record(format!("add-receiver:{kind}"));
        self.log.lock().unwrap().receivers.push(kind);
        Ok(())
    }

    async fn restart_ice(&self) -> Result<SessionDescription> {
        self.log.lock().unwrap().restarts += 1;
        self.create_offer(true).await
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Capture that is always denied
pub struct DeniedCapture;

#[async_trait]
impl MediaCapture for DeniedCapture {
    async fn acquire(&self, _request: &CaptureRequest) -> Result<Vec<LocalTrack>> {
        Err(Error::MediaAcquisition("permission denied".into()))
    }
}

pub fn capture() -> Arc<dyn MediaCapture> {
    Arc::new(SampleCapture)
}

pub fn candidate(n: u8) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: Some("remote".into()),
    }
}

/// Polls `cond` until it holds or five seconds pass
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Receives session events until `want` matches one
pub async fn wait_for_event(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    seen: &mut Vec<SessionEvent>,
    want: impl Fn(&SessionEvent) -> bool,
) {
    if seen.iter().any(&want) {
        return;
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            let hit = want(&event);
            seen.push(event);
            if hit {
                return;
            }
        }
        panic!("event stream closed before the expected event");
    })
    .await
    .expect("event not received in time");
}
