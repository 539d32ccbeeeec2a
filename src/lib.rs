pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::{Args, SessionConfig};
pub use error::{DisconnectReason, Error, Result};
pub use logger::{Notifier, SessionEvent};
pub use session::{run_session, Session, SessionReport};
pub use signaling::{ChannelEvent, SignalingChannel};

use peer::SampleCapture;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs one session described by the command line and reports how it ended.
///
/// The broadcaster side uses [`SampleCapture`], whose tracks only carry what
/// is written to them. Nothing writes frames here, so a viewer negotiates and
/// connects but never sees a remote stream from a CLI broadcaster. Library
/// users feed frames through [`peer::LocalTrack::write_sample`] or pass their
/// own [`peer::MediaCapture`] to [`run_session`].
pub async fn run(args: Args) -> Result<SessionReport> {
    logger::init_tracing(args.log_filter.as_deref());
    let config = args.into_config()?;
    if config.role == peer::Role::Broadcaster {
        info!("Display id: {}", config.session_id);
        warn!("No frame source attached: tracks are negotiated but stay silent");
    }

    let (notifier, mut events) = Notifier::new();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connected => info!("Connected"),
                SessionEvent::Recovering => info!("Connection problem, recovering"),
                SessionEvent::Recovered => info!("Connection recovered"),
                SessionEvent::RemoteStream(stream) => {
                    info!("Receiving stream {} ({} tracks)", stream.id, stream.tracks.len())
                }
                SessionEvent::Disconnected(reason) => info!("Disconnected {reason}"),
            }
        }
    });

    let report = run_session(config, Arc::new(SampleCapture), notifier).await;
    let _ = watcher.await;
    report
}
