//! Voice activity gate using energy-based analysis.
//!
//! Classifies each captured PCM16 frame by RMS amplitude so silence and
//! room noise are never transmitted and never trigger the server's
//! turn-taking.

use crate::config::VadConfig;

/// Energy gate over PCM16 frames. Stateless; deterministic per frame.
#[derive(Debug, Clone, Copy)]
pub struct VoiceGate {
    /// RMS threshold on the signed 16-bit sample scale.
    threshold: f32,
}

impl VoiceGate {
    /// Create a gate from configuration.
    pub fn new(config: &VadConfig) -> Self {
        Self {
            threshold: config.rms_threshold,
        }
    }

    /// Whether the frame's RMS amplitude exceeds the speech threshold.
    ///
    /// Empty frames are never speech.
    pub fn is_speech(&self, frame: &[i16]) -> bool {
        rms(frame) > self.threshold
    }
}

/// Compute RMS amplitude of PCM16 samples.
pub fn rms(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = frame.iter().map(|s| f64::from(*s) * f64::from(*s)).sum();
    (sum_sq / frame.len() as f64).sqrt() as f32
}
