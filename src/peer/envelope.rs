//! Signal envelope codec
//!
//! On the wire every signal is `{"event": <tag>, "data": <json string>}`, where
//! `data` is the payload serialized on its own. Decoding reads the outer
//! envelope first and then parses `data` according to the tag.

use crate::error::{Error, Result};
use crate::peer::types::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

pub const OFFER_REQUEST: &str = "offer-request";
pub const OFFER: &str = "offer";
pub const ANSWER: &str = "answer";
pub const ICE: &str = "ice";

/// Decoded signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Asks the other side to author an offer
    OfferRequest,
    Offer(SessionDescription),
    Answer(SessionDescription),
    Ice(IceCandidate),
}

impl Signal {
    /// Event tag carried in the envelope
    pub fn event(&self) -> &'static str {
        match self {
            Signal::OfferRequest => OFFER_REQUEST,
            Signal::Offer(_) => OFFER,
            Signal::Answer(_) => ANSWER,
            Signal::Ice(_) => ICE,
        }
    }
}

/// Outer envelope as written on the signaling channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub event: String,
    pub data: String,
}

impl Envelope {
    pub fn from_signal(signal: &Signal) -> Result<Self> {
        let data = match signal {
            Signal::OfferRequest => "{}".to_string(),
            Signal::Offer(desc) | Signal::Answer(desc) => serde_json::to_string(desc)?,
            Signal::Ice(candidate) => serde_json::to_string(candidate)?,
        };
        Ok(Self {
            event: signal.event().to_string(),
            data,
        })
    }

    /// Parse `data` according to `event`
    pub fn into_signal(self) -> Result<Signal> {
        match self.event.as_str() {
            OFFER_REQUEST => Ok(Signal::OfferRequest),
            OFFER => description(&self.data).map(Signal::Offer),
            ANSWER => description(&self.data).map(Signal::Answer),
            ICE => serde_json::from_str::<IceCandidate>(&self.data)
                .map(Signal::Ice)
                .map_err(|e| Error::MalformedSignal(format!("ice payload: {e}"))),
            _ => Err(Error::UnknownEvent(self.event)),
        }
    }
}

fn description(data: &str) -> Result<SessionDescription> {
    serde_json::from_str(data).map_err(|e| Error::MalformedSignal(format!("description payload: {e}")))
}

/// Serialize a signal into the text frame written on the channel
pub fn encode(signal: &Signal) -> Result<String> {
    Ok(serde_json::to_string(&Envelope::from_signal(signal)?)?)
}

/// Parse a text frame read from the channel
pub fn decode(text: &str) -> Result<Signal> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| Error::MalformedSignal(format!("envelope: {e}")))?;
    envelope.into_signal()
}
