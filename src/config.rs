//! Configuration types for the conversation client.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Agent server settings.
    pub server: ServerConfig,
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Voice activity gate settings.
    pub vad: VadConfig,
    /// Capture buffering settings.
    pub capture: CaptureConfig,
}

/// Agent server endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the agent server, without a trailing slash.
    pub base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_owned(),
        }
    }
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz. The server expects 16kHz mono PCM16.
    pub input_sample_rate: u32,
    /// Playback sample rate in Hz. Agent speech arrives as 24kHz PCM16.
    pub output_sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            input_device: None,
            output_device: None,
        }
    }
}

/// Voice activity gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS amplitude threshold on the signed 16-bit sample scale.
    ///
    /// Frames whose RMS falls below this value are treated as room noise
    /// and never transmitted. Calibrated empirically:
    ///   - 50:  very sensitive (quiet speech, some keyboard noise)
    ///   - 100: normal sensitivity (default)
    ///   - 300: noisy environments
    pub rms_threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            rms_threshold: 100.0,
        }
    }
}

/// Capture buffering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interval between flushes of buffered speech frames, in ms.
    ///
    /// Flushing is periodic rather than per-frame to bound the outbound
    /// request rate.
    pub flush_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 200,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ChannelError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_server_contract() {
        let config = ClientConfig::default();
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.audio.output_sample_rate, 24_000);
        assert_eq!(config.capture.flush_interval_ms, 200);
    }

    #[test]
    fn from_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let toml = r#"
[server]
base_url = "http://localhost:9000"

[vad]
rms_threshold = 250.0
"#;
        std::fs::write(&path, toml).expect("write config");

        let loaded = ClientConfig::from_file(&path).expect("parse config");
        assert_eq!(loaded.server.base_url, "http://localhost:9000");
        assert_eq!(loaded.vad.rms_threshold, 250.0);
        // Unspecified sections fall back to defaults.
        assert_eq!(loaded.audio.input_sample_rate, 16_000);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = ClientConfig::from_file(std::path::Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }
}
