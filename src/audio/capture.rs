//! Microphone audio capture using cpal.
//!
//! Captures at the device's native sample rate, downsamples to 16kHz mono,
//! narrows to PCM16, and accumulates speech-gated frames that are flushed
//! on a periodic timer as outbound audio buffers.

use crate::codec::{pcm16_from_f32, pcm16_to_bytes};
use crate::config::{AudioConfig, CaptureConfig, VadConfig};
use crate::error::{ChannelError, Result};
use crate::vad::VoiceGate;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Speech-gated frame buffer shared between the capture callback and the
/// flush timer. All access goes through one mutex.
#[derive(Debug)]
pub struct FrameAccumulator {
    gate: VoiceGate,
    pending: Vec<u8>,
}

impl FrameAccumulator {
    /// Create an empty accumulator with the given gate.
    pub fn new(gate: VoiceGate) -> Self {
        Self {
            gate,
            pending: Vec::new(),
        }
    }

    /// Gate one PCM16 frame; append its bytes when it carries speech.
    ///
    /// Returns whether the frame was buffered. Silent frames are consumed
    /// and discarded so the pending buffer only ever holds speech.
    pub fn push_frame(&mut self, frame: &[i16]) -> bool {
        if !self.gate.is_speech(frame) {
            return false;
        }
        self.pending.extend_from_slice(&pcm16_to_bytes(frame));
        true
    }

    /// Take all buffered bytes, leaving the accumulator empty.
    ///
    /// Returns `None` when nothing was buffered since the last flush.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Number of buffered bytes.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Audio capture from the system microphone via cpal.
///
/// Uses the device's default configuration for compatibility and
/// downsamples to the configured input rate in software.
pub struct MicCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    target_sample_rate: u32,
}

impl MicCapture {
    /// Create a new capture instance.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::DeviceUnavailable`] if no input device is
    /// available or the named device is not found.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| {
                    ChannelError::DeviceUnavailable(format!("cannot enumerate devices: {e}"))
                })?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    ChannelError::DeviceUnavailable(format!("input device '{name}' not found"))
                })?
        } else {
            host.default_input_device()
                .ok_or_else(|| ChannelError::DeviceUnavailable("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device.default_input_config().map_err(|e| {
            ChannelError::DeviceUnavailable(format!("no default input config: {e}"))
        })?;

        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
        })
    }

    /// Run the capture loop until cancelled.
    ///
    /// Each raw device frame is converted to 16kHz mono PCM16 and gated
    /// into `accumulator`; the flush timer periodically hands accumulated
    /// speech to `flush_tx`. The result of opening the device is reported
    /// once through `ready_tx` so the caller can fail fast.
    pub async fn run(
        &self,
        accumulator: Arc<Mutex<FrameAccumulator>>,
        flush_tx: mpsc::Sender<Vec<u8>>,
        flush_interval: Duration,
        ready_tx: oneshot::Sender<Result<()>>,
        cancel: CancellationToken,
    ) {
        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;
        let callback_acc = Arc::clone(&accumulator);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };
                let samples = if native_rate != target_rate {
                    downsample(&mono, native_rate, target_rate)
                } else {
                    mono
                };
                let frame = pcm16_from_f32(&samples);
                if let Ok(mut acc) = callback_acc.lock() {
                    acc.push_frame(&frame);
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        );

        // A stop requested while the device was being opened wins: abandon
        // the stream without ever starting it.
        if cancel.is_cancelled() {
            let _ = ready_tx.send(Ok(()));
            return;
        }

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(ChannelError::PermissionDenied(format!(
                    "failed to open input stream: {e}"
                ))));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(ChannelError::PermissionDenied(format!(
                "failed to start input stream: {e}"
            ))));
            return;
        }

        let _ = ready_tx.send(Ok(()));
        info!(
            "audio capture started: native {}Hz -> target {}Hz",
            native_rate, target_rate
        );

        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let flushed = accumulator.lock().ok().and_then(|mut acc| acc.take());
                    if let Some(buffer) = flushed {
                        if flush_tx.try_send(buffer).is_err() {
                            debug!("flush channel full, dropping audio buffer");
                        }
                    }
                }
            }
        }

        // Final synchronous flush of whatever was gated since the last tick.
        let remaining = accumulator.lock().ok().and_then(|mut acc| acc.take());
        if let Some(buffer) = remaining {
            let _ = flush_tx.try_send(buffer);
        }

        drop(stream);
        info!("audio capture stopped");
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(|e| {
            ChannelError::DeviceUnavailable(format!("cannot enumerate devices: {e}"))
        })?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

/// Running capture task state.
struct CaptureTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the microphone for its lifetime: acquire in `start()`, release on
/// every exit path of `stop()`.
pub struct CapturePipeline {
    audio: AudioConfig,
    vad: VadConfig,
    flush_interval: Duration,
    task: Option<CaptureTask>,
}

impl CapturePipeline {
    /// Create a stopped pipeline.
    pub fn new(audio: &AudioConfig, vad: &VadConfig, capture: &CaptureConfig) -> Self {
        Self {
            audio: audio.clone(),
            vad: vad.clone(),
            flush_interval: Duration::from_millis(capture.flush_interval_ms),
            task: None,
        }
    }

    /// Whether a capture task currently holds the microphone.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Acquire the microphone and start gated capture.
    ///
    /// Flushed speech buffers are delivered on `flush_tx` every flush
    /// interval.
    ///
    /// # Errors
    ///
    /// Fails fast with [`ChannelError::Audio`] if capture is already
    /// running, [`ChannelError::DeviceUnavailable`] if no device exists,
    /// or [`ChannelError::PermissionDenied`] if the platform refuses the
    /// stream. On error the pipeline stays stopped.
    pub async fn start(&mut self, flush_tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        if self.task.is_some() {
            return Err(ChannelError::Audio("capture already running".into()));
        }

        let capture = MicCapture::new(&self.audio)?;
        let accumulator = Arc::new(Mutex::new(FrameAccumulator::new(VoiceGate::new(&self.vad))));
        let flush_interval = self.flush_interval;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            capture
                .run(accumulator, flush_tx, flush_interval, ready_tx, task_cancel)
                .await;
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.task = Some(CaptureTask { cancel, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                handle.await.ok();
                Err(e)
            }
            Err(_) => Err(ChannelError::Audio("capture task died during start".into())),
        }
    }

    /// Stop capture: flush remaining buffered audio, then release the
    /// device. Idempotent and safe to call when never started.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation downsampler.
///
/// Sufficient quality for speech (48kHz -> 16kHz); no anti-alias filter
/// needed since speech energy sits below 8kHz.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulator() -> FrameAccumulator {
        FrameAccumulator::new(VoiceGate::new(&VadConfig::default()))
    }

    fn speech_frame() -> Vec<i16> {
        (0..512).map(|i| if i % 2 == 0 { 4000 } else { -4000 }).collect()
    }

    #[test]
    fn silent_frames_never_buffered() {
        let mut acc = accumulator();
        for _ in 0..50 {
            assert!(!acc.push_frame(&[0; 512]));
        }
        assert_eq!(acc.pending_len(), 0);
        assert!(acc.take().is_none());
    }

    #[test]
    fn speech_frames_accumulate_in_order() {
        let mut acc = accumulator();
        let frame = speech_frame();
        assert!(acc.push_frame(&frame));
        assert!(acc.push_frame(&frame));
        assert_eq!(acc.pending_len(), frame.len() * 2 * 2);

        let flushed = acc.take().expect("buffered speech");
        assert_eq!(flushed.len(), frame.len() * 2 * 2);
        // take() clears atomically.
        assert!(acc.take().is_none());
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn mixed_frames_keep_only_speech() {
        let mut acc = accumulator();
        let frame = speech_frame();
        acc.push_frame(&[0; 512]);
        acc.push_frame(&frame);
        acc.push_frame(&[0; 512]);
        let flushed = acc.take().expect("one speech frame");
        assert_eq!(flushed.len(), frame.len() * 2);
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let mut pipeline = CapturePipeline::new(
            &AudioConfig::default(),
            &VadConfig::default(),
            &CaptureConfig::default(),
        );
        assert!(!pipeline.is_running());
        pipeline.stop().await;
        pipeline.stop().await;
        assert!(!pipeline.is_running());
    }

    #[test]
    fn to_mono_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn downsample_halves_length() {
        let samples: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let out = downsample(&samples, 48_000, 16_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn downsample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(downsample(&samples, 16_000, 16_000), samples);
    }
}
