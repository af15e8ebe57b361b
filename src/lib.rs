//! Voicelink: real-time voice/text conversation client.
//!
//! Exchanges turn-based messages with a remote conversational agent over
//! a persistent server-push event stream, with an optional live audio
//! sub-channel:
//!
//! - **Capture**: microphone audio via `cpal`, downsampled to 16kHz PCM16
//! - **Gate**: RMS voice-activity gating so silence is never transmitted
//! - **Session**: SSE inbound stream + per-frame outbound requests
//! - **Playback**: gapless 24kHz playout of agent speech with hard
//!   interruption
//! - **Client**: the turn state machine routing every inbound event to
//!   the transcript or the playback queue, in arrival order

pub mod audio;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod runtime;
pub mod session;
pub mod sse;
pub mod transcript;
pub mod vad;

pub use client::{ChatClient, ClientCommand, TurnState};
pub use config::ClientConfig;
pub use error::{ChannelError, Result};
pub use runtime::ClientEvent;
pub use session::{ConnectionStatus, InboundEvent, OutboundFrame, StreamMode};
