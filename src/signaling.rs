//! Signaling client
//!
//! A [`SignalingChannel`] is an ordered, reliable, bidirectional stream of
//! envelopes scoped to one session id and one role. Over the network it is a
//! WebSocket on `{base}/register?id=..` (broadcaster) or `{base}/connect?id=..`
//! (viewer); [`SignalingChannel::pair`] gives two in-memory ends with the same
//! behaviour.

use crate::error::{Error, Result};
use crate::peer::envelope::{self, Signal};
use crate::peer::types::Role;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// What the channel delivers to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One inbound text frame, in arrival order
    Message(String),
    /// Channel closed; terminal
    Closed(Option<String>),
    /// Channel failed; terminal
    Error(String),
}

enum Outbound {
    WebSocket(mpsc::UnboundedSender<Message>),
    Memory(mpsc::UnboundedSender<ChannelEvent>),
}

pub struct SignalingChannel {
    outbound: Outbound,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    terminated: bool,
}

/// Signaling endpoint for a session id and role
pub fn endpoint_url(base: &str, session_id: &str, role: Role) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| Error::InvalidConfig(format!("signaling url '{base}': {e}")))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(Error::InvalidConfig(format!(
                "unsupported signaling scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::InvalidConfig(format!("cannot use scheme '{scheme}' for {base}")))?;

    let path = format!("{}/{}", url.path().trim_end_matches('/'), role.channel_name());
    url.set_path(&path);
    url.query_pairs_mut().clear().append_pair("id", session_id);
    Ok(url)
}

impl SignalingChannel {
    /// Connects to the signaling server for `session_id` as `role`
    pub async fn open(base: &str, session_id: &str, role: Role) -> Result<Self> {
        let url = endpoint_url(base, session_id, role)?;
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect: {e}")))?;
        info!("Signaler connected");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            debug!("Sender task terminated");
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => ChannelEvent::Message(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => ChannelEvent::Message(text),
                        Err(_) => {
                            warn!("Dropping non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        let _ = in_tx.send(ChannelEvent::Closed(reason));
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                };
                if in_tx.send(event).is_err() {
                    break;
                }
            }
            debug!("Receiver task terminated");
        });

        Ok(Self {
            outbound: Outbound::WebSocket(out_tx),
            inbound: in_rx,
            terminated: false,
        })
    }

    /// Two in-memory ends wired to each other
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = Self {
            outbound: Outbound::Memory(b_tx),
            inbound: a_rx,
            terminated: false,
        };
        let b = Self {
            outbound: Outbound::Memory(a_tx),
            inbound: b_rx,
            terminated: false,
        };
        (a, b)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Encodes and writes a signal; fire-and-forget
    pub fn send(&self, signal: &Signal) {
        if self.terminated {
            debug!("Channel closed, not sending {}", signal.event());
            return;
        }
        let text = match envelope::encode(signal) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {}: {e}", signal.event());
                return;
            }
        };
        self.send_text(text);
    }

    /// Writes an already encoded frame
    pub fn send_text(&self, text: String) {
        let delivered = match &self.outbound {
            Outbound::WebSocket(tx) => tx.send(Message::Text(text)).is_ok(),
            Outbound::Memory(tx) => tx.send(ChannelEvent::Message(text)).is_ok(),
        };
        if !delivered {
            debug!("Signaling channel is gone, frame dropped");
        }
    }

    /// Next inbound event; `None` once a terminal event was delivered
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.terminated {
            return None;
        }
        let event = match self.inbound.recv().await {
            Some(event) => event,
            None => ChannelEvent::Closed(None),
        };
        if matches!(event, ChannelEvent::Closed(_) | ChannelEvent::Error(_)) {
            self.terminated = true;
        }
        Some(event)
    }

    /// Closes the channel from this side.
    ///
    /// A WebSocket always gets a Close frame, so a close started by the
    /// server is still acknowledged.
    pub fn close(&mut self) {
        if let Outbound::WebSocket(tx) = &self.outbound {
            let _ = tx.send(Message::Close(None));
        }
        if self.terminated {
            return;
        }
        self.terminated = true;
        if let Outbound::Memory(tx) = &self.outbound {
            let _ = tx.send(ChannelEvent::Closed(Some("peer closed".into())));
        }
        self.inbound.close();
    }
}
