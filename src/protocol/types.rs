// src/protocol/types.rs
//! Protocol message types for relay signaling.
//!
//! This module defines the newline-delimited JSON messages the client
//! exchanges over the untrusted relay: tunnel key-exchange messages and
//! the offer/answer/candidate envelopes of connection negotiation.
//! The relay never interprets these lines; it only forwards them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for protocol message handling
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value: {0}")]
    InvalidValue(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Signaling messages carried as text lines over the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    /// Announce/refresh one's tunnel public key to a specific peer
    #[serde(rename = "KEY_EXCHANGE")]
    KeyExchange {
        from: String,
        to: String,
        /// Base64-encoded X25519 public key
        public_key: String,
    },

    /// Hybrid-encrypted friend request payload
    #[serde(rename = "TUNNEL_MESSAGE")]
    TunnelMessage {
        from: String,
        to: String,
        /// Base64-encoded encryption envelope
        data: String,
    },

    /// Connection negotiation offer
    #[serde(rename = "OFFER")]
    Offer {
        from: String,
        to: String,
        sdp: String,
    },

    /// Connection negotiation answer
    #[serde(rename = "ANSWER")]
    Answer {
        from: String,
        to: String,
        sdp: String,
    },

    /// Connection negotiation candidate
    #[serde(rename = "CANDIDATE")]
    Candidate {
        from: String,
        to: String,
        candidate: String,
    },
}

impl SignalMessage {
    /// Parse one relay line into a signaling message
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Serialize into a single relay line (no trailing newline)
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Destination peer of this message
    pub fn to_peer(&self) -> &str {
        match self {
            SignalMessage::KeyExchange { to, .. }
            | SignalMessage::TunnelMessage { to, .. }
            | SignalMessage::Offer { to, .. }
            | SignalMessage::Answer { to, .. }
            | SignalMessage::Candidate { to, .. } => to,
        }
    }

    /// Originating peer of this message
    pub fn from_peer(&self) -> &str {
        match self {
            SignalMessage::KeyExchange { from, .. }
            | SignalMessage::TunnelMessage { from, .. }
            | SignalMessage::Offer { from, .. }
            | SignalMessage::Answer { from, .. }
            | SignalMessage::Candidate { from, .. } => from,
        }
    }
}

/// Decrypted friend-request payload carried inside a `TUNNEL_MESSAGE`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestPayload {
    /// Payload discriminator, always "friend_request"
    pub request_type: String,
    pub from_peer: String,
    pub to_peer: String,
    /// Sender's identity public key (base64)
    pub identity_key: String,
    /// Sender's long-term encryption key (base64)
    pub long_term_key: String,
    /// Free-form greeting message
    pub message: String,
    /// Unix millis at send time
    pub timestamp: u64,
}

/// A single fragment of an oversized text message.
///
/// Sent as a JSON text frame on the control channel; the receiver buffers
/// fragments per `(peer, message_id)` and reassembles by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentFrame {
    /// Frame discriminator, always "fragment"
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "chunkIndex")]
    pub chunk_index: u32,
    #[serde(rename = "totalChunks")]
    pub total_chunks: u32,
    /// Base64-encoded chunk of the UTF-8 payload
    pub data: String,
}

impl FragmentFrame {
    pub const FRAME_TYPE: &'static str = "fragment";

    pub fn new(message_id: String, chunk_index: u32, total_chunks: u32, chunk: &[u8]) -> Self {
        Self {
            frame_type: Self::FRAME_TYPE.to_string(),
            message_id,
            chunk_index,
            total_chunks,
            data: base64::encode(chunk),
        }
    }

    /// Try to parse a control frame as a fragment; `None` if it is a plain message
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let parsed: FragmentFrame = serde_json::from_slice(frame).ok()?;
        if parsed.frame_type == Self::FRAME_TYPE {
            Some(parsed)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_message_tags() {
        let msg = SignalMessage::KeyExchange {
            from: "alice".into(),
            to: "bob".into(),
            public_key: "a2V5".into(),
        };
        let line = msg.to_line().unwrap();
        assert!(line.contains("\"KEY_EXCHANGE\""));

        let parsed = SignalMessage::from_line(&line).unwrap();
        assert_eq!(parsed.from_peer(), "alice");
        assert_eq!(parsed.to_peer(), "bob");
    }

    #[test]
    fn test_tunnel_message_round_trip() {
        let msg = SignalMessage::TunnelMessage {
            from: "bob".into(),
            to: "alice".into(),
            data: "ZW5j".into(),
        };
        let line = msg.to_line().unwrap();
        assert!(line.contains("\"TUNNEL_MESSAGE\""));
        match SignalMessage::from_line(&line).unwrap() {
            SignalMessage::TunnelMessage { data, .. } => assert_eq!(data, "ZW5j"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        assert!(SignalMessage::from_line("not json at all").is_err());
        assert!(SignalMessage::from_line("{\"type\":\"NO_SUCH_TAG\"}").is_err());
    }

    #[test]
    fn test_fragment_frame_wire_keys() {
        let frame = FragmentFrame::new("abc123XY".into(), 2, 5, b"chunk");
        let json = serde_json::to_string(&frame).unwrap();

        assert!(json.contains("\"type\":\"fragment\""));
        assert!(json.contains("\"messageId\""));
        assert!(json.contains("\"chunkIndex\""));
        assert!(json.contains("\"totalChunks\""));

        let parsed = FragmentFrame::parse(json.as_bytes()).unwrap();
        assert_eq!(parsed.chunk_index, 2);
        assert_eq!(base64::decode(&parsed.data).unwrap(), b"chunk");
    }

    #[test]
    fn test_fragment_parse_rejects_plain_text() {
        assert!(FragmentFrame::parse(b"hello there").is_none());
        assert!(FragmentFrame::parse(b"{\"type\":\"other\"}").is_none());
    }
}
