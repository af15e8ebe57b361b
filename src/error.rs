//! Error types for the voice/text channel.

/// Top-level error type for the conversation client.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Microphone access was refused by the platform.
    ///
    /// Fatal to starting voice mode; recoverable by retrying after the
    /// user grants permission.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture or playback device.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The agent endpoint failed its liveness check.
    #[error("server unreachable: {0}")]
    ServerUnreachable(String),

    /// The inbound event stream failed mid-session.
    #[error("stream error: {0}")]
    Stream(String),

    /// A malformed inbound event or malformed base64 payload.
    ///
    /// The offending event is dropped; the stream continues.
    #[error("decode error: {0}")]
    Decode(String),

    /// An outbound frame could not be delivered.
    ///
    /// Logged and never retried; both text and audio are loss-tolerant.
    #[error("send failed: {0}")]
    Send(String),

    /// Audio device or stream error during operation.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChannelError>;
