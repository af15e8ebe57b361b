//! Conversions between base64 text, raw byte buffers, and PCM16 samples.
//!
//! The wire protocol carries audio as base64-encoded little-endian PCM16;
//! the capture side produces f32 samples in \[-1, 1\] that must be narrowed
//! without overflow.

use crate::error::{ChannelError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decode a base64 string into raw bytes.
///
/// # Errors
///
/// Returns [`ChannelError::Decode`] on malformed input.
pub fn bytes_from_base64(s: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(s)
        .map_err(|e| ChannelError::Decode(format!("malformed base64: {e}")))
}

/// Encode raw bytes as a base64 string. Total; no failure path.
pub fn base64_from_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Convert f32 samples in \[-1, 1\] to PCM16.
///
/// Each sample is clamped before scaling, so inputs outside the nominal
/// range narrow to the i16 boundaries instead of wrapping.
pub fn pcm16_from_f32(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Convert PCM16 samples to f32 in \[-1, 1\] for playback.
pub fn f32_from_pcm16(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|s| f32::from(*s) / 32768.0).collect()
}

/// Serialize PCM16 samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Deserialize little-endian bytes into PCM16 samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip() {
        let cases: &[&[u8]] = &[b"", b"\x00", b"hello", &[0xff, 0x00, 0x7f, 0x80], &[1; 1024]];
        for bytes in cases {
            let encoded = base64_from_bytes(bytes);
            let decoded = bytes_from_base64(&encoded).expect("valid base64");
            assert_eq!(&decoded, bytes);
        }
    }

    #[test]
    fn malformed_base64_is_decode_error() {
        let result = bytes_from_base64("not!!valid@@base64");
        assert!(matches!(
            result,
            Err(crate::error::ChannelError::Decode(_))
        ));
    }

    #[test]
    fn pcm16_narrowing_never_overflows() {
        // Inputs well outside [-1, 1] must saturate, not wrap.
        let samples = [0.0, 0.5, -0.5, 1.0, -1.0, 2.0, -2.0, 1000.0, -1000.0];
        let pcm = pcm16_from_f32(&samples);
        assert_eq!(pcm[0], 0);
        assert_eq!(pcm[3], 32767);
        assert_eq!(pcm[4], -32767);
        assert_eq!(pcm[5], 32767);
        assert_eq!(pcm[6], -32767);
        assert_eq!(pcm[7], 32767);
        assert_eq!(pcm[8], -32767);
    }

    #[test]
    fn pcm16_byte_roundtrip() {
        let samples = [0_i16, 1, -1, i16::MAX, i16::MIN, 12345, -12345];
        let bytes = pcm16_to_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(pcm16_from_bytes(&bytes), samples);
    }

    #[test]
    fn trailing_odd_byte_ignored() {
        let samples = pcm16_from_bytes(&[0x34, 0x12, 0xff]);
        assert_eq!(samples, vec![0x1234]);
    }
}
