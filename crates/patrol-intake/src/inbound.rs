//! Inbound datagrams, tagged by the socket they arrived on.
//!
//! The sender's identity plays no part: anything arriving on the environment
//! port is an environment reading, anything on the coordinate port is a
//! coordinate.

use std::fmt;

use crate::error::IntakeError;

/// Which socket a datagram arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Free-text sensor reading, e.g. `"23.4,55.1"`.
    Environment,
    /// Patrol position announcement, e.g. `"1.0, 2.0, 0.5"`.
    Coordinate,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Environment => f.write_str("environment"),
            Channel::Coordinate => f.write_str("coordinate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Environment(String),
    Coordinate(String),
}

impl InboundMessage {
    pub fn channel(&self) -> Channel {
        match self {
            InboundMessage::Environment(_) => Channel::Environment,
            InboundMessage::Coordinate(_) => Channel::Coordinate,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            InboundMessage::Environment(s) | InboundMessage::Coordinate(s) => s,
        }
    }
}

/// Decode a datagram received on `channel`.  The text is kept verbatim.
///
/// # Errors
///
/// [`IntakeError::Decode`] when `bytes` is not UTF-8.
pub fn decode(channel: Channel, bytes: &[u8]) -> Result<InboundMessage, IntakeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| IntakeError::Decode {
            channel,
            reason: e.to_string(),
        })?
        .to_string();
    Ok(match channel {
        Channel::Environment => InboundMessage::Environment(text),
        Channel::Coordinate => InboundMessage::Coordinate(text),
    })
}

/// Like [`decode`], but never fails: invalid bytes are replaced with U+FFFD.
pub fn decode_lossy(channel: Channel, bytes: &[u8]) -> InboundMessage {
    let text = String::from_utf8_lossy(bytes).into_owned();
    match channel {
        Channel::Environment => InboundMessage::Environment(text),
        Channel::Coordinate => InboundMessage::Coordinate(text),
    }
}
