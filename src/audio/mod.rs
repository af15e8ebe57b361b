//! Microphone capture and speaker playback pipelines built on cpal.

pub mod capture;
pub mod playback;

pub use capture::{CapturePipeline, FrameAccumulator, MicCapture};
pub use playback::{PlaybackPipeline, PlayoutQueue, SpeakerOutput};
