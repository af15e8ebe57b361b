//! Wire-level event and frame types exchanged with the agent server.

use crate::codec;
use crate::error::{ChannelError, Result};
use serde::{Deserialize, Serialize};

/// Whether the session's stream carries audio+text or text only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Text deltas only.
    Text,
    /// Text deltas plus agent speech audio.
    Audio,
}

impl StreamMode {
    /// Value of the `is_audio` query flag used when opening the stream.
    pub fn is_audio_flag(self) -> &'static str {
        match self {
            Self::Text => "false",
            Self::Audio => "true",
        }
    }
}

/// A discriminated payload arriving on the inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The agent finished its current utterance.
    TurnComplete,
    /// User speech pre-empted an in-progress agent utterance; playback
    /// must stop immediately.
    Interrupted,
    /// An incremental chunk of the agent's current textual reply.
    TextDelta(String),
    /// One frame of agent speech, decoded from base64 PCM16.
    AudioChunk(Vec<u8>),
}

/// Raw JSON shape of an inbound stream event.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireEvent {
    turn_complete: Option<bool>,
    interrupted: Option<bool>,
    mime_type: Option<String>,
    data: Option<String>,
}

impl InboundEvent {
    /// Parse one SSE data payload into an event.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Decode`] on malformed JSON, an unknown
    /// shape, or malformed base64 audio. Callers drop the event and keep
    /// the stream alive.
    pub fn parse(payload: &str) -> Result<Self> {
        let wire: WireEvent = serde_json::from_str(payload)
            .map_err(|e| ChannelError::Decode(format!("malformed event: {e}")))?;

        // Interruption wins over turn completion: playback must stop.
        if wire.interrupted == Some(true) {
            return Ok(Self::Interrupted);
        }
        if wire.turn_complete == Some(true) {
            return Ok(Self::TurnComplete);
        }

        match (wire.mime_type.as_deref(), wire.data) {
            (Some("text/plain"), Some(text)) => Ok(Self::TextDelta(text)),
            (Some("audio/pcm"), Some(b64)) => {
                Ok(Self::AudioChunk(codec::bytes_from_base64(&b64)?))
            }
            (Some(other), Some(_)) => Err(ChannelError::Decode(format!(
                "unsupported mime type: {other}"
            ))),
            _ => Err(ChannelError::Decode("event has no recognizable shape".into())),
        }
    }
}

/// A client-to-server envelope, one request per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// A complete user text message.
    Text(String),
    /// One flushed buffer of gated microphone audio, raw PCM16 bytes.
    Audio(Vec<u8>),
}

/// JSON body of an outbound `/send` request.
#[derive(Debug, Serialize, PartialEq)]
pub struct WireFrame {
    /// `text/plain` or `audio/pcm`.
    pub mime_type: &'static str,
    /// Plain text, or base64 PCM16 for audio.
    pub data: String,
}

impl OutboundFrame {
    /// Encode the frame for the wire.
    pub fn to_wire(&self) -> WireFrame {
        match self {
            Self::Text(text) => WireFrame {
                mime_type: "text/plain",
                data: text.clone(),
            },
            Self::Audio(bytes) => WireFrame {
                mime_type: "audio/pcm",
                data: codec::base64_from_bytes(bytes),
            },
        }
    }
}
