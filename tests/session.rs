mod common;

use common::{capture, wait_for_event, wait_until, DeniedCapture, FakePeer};
use screenlink::peer::envelope;
use screenlink::peer::{
    CaptureRequest, ConnectivityState, NegotiationEngine, NegotiationState, PeerEvent,
    SessionDescription, Signal,
};
use screenlink::{
    ChannelEvent, DisconnectReason, Notifier, Session, SessionEvent, SignalingChannel,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// Next decoded signal from the far end, `None` once it closed
async fn next_signal(channel: &mut SignalingChannel) -> Option<Signal> {
    loop {
        let event = timeout(Duration::from_secs(5), channel.recv())
            .await
            .expect("no signal in time")?;
        match event {
            ChannelEvent::Message(text) => return Some(envelope::decode(&text).unwrap()),
            ChannelEvent::Closed(_) | ChannelEvent::Error(_) => return None,
        }
    }
}

/// Skips trickled candidates until `want` matches
async fn expect_signal(channel: &mut SignalingChannel, want: impl Fn(&Signal) -> bool) -> Signal {
    loop {
        match next_signal(channel).await {
            Some(signal) if want(&signal) => return signal,
            Some(_) => continue,
            None => panic!("channel closed before the expected signal"),
        }
    }
}

fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}

fn disconnects(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Disconnected(_)))
        .count()
}

#[tokio::test]
async fn broadcaster_and_viewer_negotiate() {
    let (a_chan, b_chan) = SignalingChannel::pair();
    let (a_peer, a, a_events) = FakePeer::new("A");
    let (b_peer, b, b_events) = FakePeer::new("B");
    let (a_notifier, mut a_notes) = Notifier::new();
    let (b_notifier, mut b_notes) = Notifier::new();

    let a_engine = NegotiationEngine::broadcaster(
        capture(),
        CaptureRequest::default(),
        Box::new(a_peer),
        a_notifier.clone(),
    );
    let b_engine = NegotiationEngine::viewer(Box::new(b_peer), b_notifier.clone());
    let a_task = tokio::spawn(Session::new("desk", a_chan, a_engine, a_events, a_notifier).run());
    let b_task = tokio::spawn(Session::new("desk", b_chan, b_engine, b_events, b_notifier).run());

    let mut a_seen = Vec::new();
    let mut b_seen = Vec::new();
    wait_for_event(&mut a_notes, &mut a_seen, |e| *e == SessionEvent::Connected).await;
    wait_for_event(&mut b_notes, &mut b_seen, |e| *e == SessionEvent::Connected).await;
    wait_for_event(&mut b_notes, &mut b_seen, |e| {
        matches!(e, SessionEvent::RemoteStream(s) if s.tracks.len() == 2)
    })
    .await;
    wait_until(|| b.with_log(|l| !l.candidates.is_empty())).await;

    // the broadcaster stops sharing; the viewer hangs up
    b.emit(PeerEvent::StreamEnded("stream-A".into()));
    let b_report = b_task.await.unwrap();
    let a_report = a_task.await.unwrap();

    assert_eq!(b_report.final_state, NegotiationState::Ended);
    assert_eq!(b_report.reason, DisconnectReason::StreamEnded);
    let stream = b_report.remote_stream.expect("viewer exposes the stream");
    assert_eq!(stream.id, "stream-A");
    assert_eq!(stream.tracks.len(), 2);

    assert_eq!(a_report.final_state, NegotiationState::Connected);
    assert!(matches!(a_report.reason, DisconnectReason::TransportClosed(_)));
    assert!(a_report.remote_stream.is_none());
    assert!(a_report.ended_at >= a_report.started_at);

    assert_eq!(a.with_log(|l| l.offers_created), 1);
    assert_eq!(b.with_log(|l| l.answers_created), 1);
    assert!(a.with_log(|l| !l.candidates.is_empty()));
    assert!(a.with_log(|l| l.closed) && b.with_log(|l| l.closed));

    a_seen.extend(drain(&mut a_notes));
    b_seen.extend(drain(&mut b_notes));
    assert_eq!(disconnects(&a_seen), 1);
    assert_eq!(disconnects(&b_seen), 1);
}

#[tokio::test]
async fn channel_closed_before_answer() {
    let (a_chan, mut remote) = SignalingChannel::pair();
    let (a_peer, a, a_events) = FakePeer::new("A");
    let (notifier, mut notes) = Notifier::new();
    let engine = NegotiationEngine::broadcaster(
        capture(),
        CaptureRequest::default(),
        Box::new(a_peer),
        notifier.clone(),
    );
    let task = tokio::spawn(Session::new("desk", a_chan, engine, a_events, notifier).run());

    remote.send(&Signal::OfferRequest);
    expect_signal(&mut remote, |s| matches!(s, Signal::Offer(_))).await;
    remote.close();

    let report = task.await.unwrap();
    assert_eq!(report.final_state, NegotiationState::Negotiating);
    assert!(matches!(report.reason, DisconnectReason::TransportClosed(_)));
    assert!(a.with_log(|l| l.closed));

    let seen = drain(&mut notes);
    assert_eq!(disconnects(&seen), 1);
    assert!(!seen.contains(&SessionEvent::Connected));
}

#[tokio::test]
async fn garbage_and_unknown_envelopes_are_skipped() {
    let (b_chan, mut remote) = SignalingChannel::pair();
    let (b_peer, _b, b_events) = FakePeer::new("B");
    let engine = NegotiationEngine::viewer(Box::new(b_peer), Notifier::silent());
    let task = tokio::spawn(Session::new("desk", b_chan, engine, b_events, Notifier::silent()).run());

    assert_eq!(next_signal(&mut remote).await, Some(Signal::OfferRequest));

    remote.send_text("not json".into());
    remote.send_text(r#"{"event":"bye","data":"{}"}"#.into());
    remote.send_text(r#"{"event":"offer","data":"{\"type\":\"offer\"}"}"#.into());
    remote.send(&Signal::Offer(SessionDescription::offer(
        "fake-offer remote tracks=video",
    )));

    let answer = expect_signal(&mut remote, |s| matches!(s, Signal::Answer(_))).await;
    let Signal::Answer(answer) = answer else {
        unreachable!()
    };
    assert!(answer.sdp.starts_with("fake-answer B"));

    remote.close();
    let report = task.await.unwrap();
    assert!(matches!(report.reason, DisconnectReason::TransportClosed(_)));
    assert_ne!(report.final_state, NegotiationState::Ended);
}

#[tokio::test]
async fn denied_capture_ends_session_without_signals() {
    let (a_chan, mut remote) = SignalingChannel::pair();
    let (a_peer, a, a_events) = FakePeer::new("A");
    let (notifier, mut notes) = Notifier::new();
    let engine = NegotiationEngine::broadcaster(
        Arc::new(DeniedCapture),
        CaptureRequest::default(),
        Box::new(a_peer),
        notifier.clone(),
    );

    let report = Session::new("desk", a_chan, engine, a_events, notifier)
        .run()
        .await;
    assert_eq!(report.final_state, NegotiationState::Ended);
    assert!(matches!(report.reason, DisconnectReason::Fatal(_)));
    assert_eq!(a.with_log(|l| l.offers_created), 0);

    // only the close reaches the far end
    assert_eq!(next_signal(&mut remote).await, None);
    assert_eq!(disconnects(&drain(&mut notes)), 1);
}

#[tokio::test]
async fn restart_that_never_converges_ends_session() {
    let (b_chan, mut remote) = SignalingChannel::pair();
    let (b_peer, b, b_events) = FakePeer::new("B");
    let (notifier, mut notes) = Notifier::new();
    let engine = NegotiationEngine::viewer(Box::new(b_peer), notifier.clone());
    let task = tokio::spawn(
        Session::new("desk", b_chan, engine, b_events, notifier)
            .with_recovery_grace(Duration::from_millis(50))
            .run(),
    );

    assert_eq!(next_signal(&mut remote).await, Some(Signal::OfferRequest));
    remote.send(&Signal::OfferRequest);
    expect_signal(&mut remote, |s| matches!(s, Signal::Offer(_))).await;
    remote.send(&Signal::Answer(SessionDescription::answer(
        "fake-answer remote tracks=video,audio",
    )));

    let mut seen = Vec::new();
    wait_for_event(&mut notes, &mut seen, |e| *e == SessionEvent::Connected).await;

    b.emit(PeerEvent::Connectivity(ConnectivityState::Failed));
    expect_signal(&mut remote, |s| {
        matches!(s, Signal::Offer(d) if d.sdp.contains("ice-restart"))
    })
    .await;

    // the far end never answers the restart
    let report = task.await.unwrap();
    assert_eq!(report.final_state, NegotiationState::Ended);
    assert_eq!(report.reason, DisconnectReason::RecoveryFailed);

    seen.extend(drain(&mut notes));
    assert!(seen.contains(&SessionEvent::Recovering));
    assert!(!seen.contains(&SessionEvent::Recovered));
    assert_eq!(
        seen.last(),
        Some(&SessionEvent::Disconnected(DisconnectReason::RecoveryFailed))
    );
}

#[tokio::test]
async fn dropped_far_end_reads_as_closed() {
    let (b_chan, remote) = SignalingChannel::pair();
    let (b_peer, _b, b_events) = FakePeer::new("B");
    let engine = NegotiationEngine::viewer(Box::new(b_peer), Notifier::silent());
    drop(remote);

    let report = Session::new("desk", b_chan, engine, b_events, Notifier::silent())
        .run()
        .await;
    assert_eq!(report.final_state, NegotiationState::Idle);
    assert_eq!(report.reason, DisconnectReason::TransportClosed(None));
}
