//! Observation events emitted by the client for UI frontends.
//!
//! Every committed state-machine mutation produces one event, so a
//! presentation layer that replays them in order always sees the latest
//! transcript state. Kept lightweight so emission never blocks event
//! processing.

use crate::session::ConnectionStatus;
use crate::transcript::Message;

/// Events describing what the client is doing "right now".
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection status changed.
    Status(ConnectionStatus),
    /// A message was appended to the transcript.
    MessageAppended(Message),
    /// An existing message grew by a text delta.
    MessageUpdated {
        /// Transcript id of the updated message.
        id: String,
        /// The appended delta, not the full content.
        delta: String,
    },
    /// The agent started or stopped composing a reply.
    Typing { active: bool },
    /// Voice mode was started or stopped.
    VoiceActive { active: bool },
    /// Playback mute was toggled.
    Muted { muted: bool },
    /// Agent speech was cut off by user speech.
    PlaybackInterrupted,
}
