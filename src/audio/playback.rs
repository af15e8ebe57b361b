//! Gapless playback of agent speech via cpal.
//!
//! Decoded PCM16 buffers are appended to a shared playout queue that the
//! output callback drains back-to-back. Interruption clears the queue
//! atomically so the listener never hears agent audio after speaking over
//! it; mute silences the output without consuming the queue, preserving
//! playback position.

use crate::codec::{f32_from_pcm16, pcm16_from_bytes};
use crate::config::AudioConfig;
use crate::error::{ChannelError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// FIFO sample queue shared between the client and the output callback.
///
/// Clones share the same underlying queue.
#[derive(Debug, Clone, Default)]
pub struct PlayoutQueue {
    samples: Arc<Mutex<VecDeque<f32>>>,
    muted: Arc<AtomicBool>,
}

impl PlayoutQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw PCM16 bytes in arrival order.
    pub fn enqueue_bytes(&self, bytes: &[u8]) {
        let samples = f32_from_pcm16(&pcm16_from_bytes(bytes));
        if let Ok(mut queue) = self.samples.lock() {
            queue.extend(samples);
        }
    }

    /// Discard all queued-but-unplayed audio immediately.
    pub fn clear(&self) {
        if let Ok(mut queue) = self.samples.lock() {
            queue.clear();
        }
    }

    /// Silence the output without consuming the queue.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Number of samples awaiting playback.
    pub fn queued_samples(&self) -> usize {
        self.samples.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Fill an output buffer from the queue, padding with silence when the
    /// queue runs dry. While muted, emits silence and leaves the queue
    /// untouched.
    pub fn fill(&self, out: &mut [f32]) {
        if self.muted.load(Ordering::Relaxed) {
            out.fill(0.0);
            return;
        }
        let mut queue = match self.samples.lock() {
            Ok(q) => q,
            Err(_) => {
                out.fill(0.0);
                return;
            }
        };
        for slot in out.iter_mut() {
            *slot = queue.pop_front().unwrap_or(0.0);
        }
    }
}

/// Audio output to the system speakers via cpal.
pub struct SpeakerOutput {
    device: cpal::Device,
    stream_config: StreamConfig,
}

impl SpeakerOutput {
    /// Create a new output instance at the configured playback rate.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::DeviceUnavailable`] if no output device is
    /// available or the named device is not found.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
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
                    ChannelError::DeviceUnavailable(format!("output device '{name}' not found"))
                })?
        } else {
            host.default_output_device()
                .ok_or_else(|| ChannelError::DeviceUnavailable("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device,
            stream_config,
        })
    }

    /// Run the output stream, pulling samples from `queue` until cancelled.
    ///
    /// The result of opening the device is reported once through
    /// `ready_tx` so the caller can fail fast.
    pub async fn run(
        &self,
        queue: PlayoutQueue,
        ready_tx: oneshot::Sender<Result<()>>,
        cancel: CancellationToken,
    ) {
        let callback_queue = queue.clone();

        let stream = self.device.build_output_stream(
            &self.stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                callback_queue.fill(data);
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        );

        if cancel.is_cancelled() {
            let _ = ready_tx.send(Ok(()));
            return;
        }

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                let _ = ready_tx.send(Err(ChannelError::DeviceUnavailable(format!(
                    "failed to open output stream: {e}"
                ))));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(ChannelError::DeviceUnavailable(format!(
                "failed to start output stream: {e}"
            ))));
            return;
        }

        let _ = ready_tx.send(Ok(()));
        info!(
            "audio playback started at {}Hz",
            self.stream_config.sample_rate
        );

        cancel.cancelled().await;
        drop(stream);
        info!("audio playback stopped");
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.output_devices().map_err(|e| {
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

/// Running playback task state.
struct PlaybackTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the output device for its lifetime. The queue outlives the device
/// so chunks that arrive while the device is still opening are queued
/// rather than dropped.
pub struct PlaybackPipeline {
    audio: AudioConfig,
    queue: PlayoutQueue,
    task: Option<PlaybackTask>,
}

impl PlaybackPipeline {
    /// Create a stopped pipeline with an empty queue.
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            audio: audio.clone(),
            queue: PlayoutQueue::new(),
            task: None,
        }
    }

    /// Whether the output device is currently open.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Open the output path and start draining the queue.
    ///
    /// # Errors
    ///
    /// Fails fast with [`ChannelError::Audio`] if playback is already
    /// running, or [`ChannelError::DeviceUnavailable`] if the device
    /// cannot be opened. On error the pipeline stays stopped.
    pub async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(ChannelError::Audio("playback already running".into()));
        }

        let output = SpeakerOutput::new(&self.audio)?;
        let queue = self.queue.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            output.run(queue, ready_tx, task_cancel).await;
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.task = Some(PlaybackTask { cancel, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                handle.await.ok();
                Err(e)
            }
            Err(_) => Err(ChannelError::Audio("playback task died during start".into())),
        }
    }

    /// Enqueue one decoded PCM16 buffer for gapless FIFO playout.
    pub fn enqueue(&self, bytes: &[u8]) {
        if bytes.len() % 2 != 0 {
            warn!("audio chunk has odd byte length {}, truncating", bytes.len());
        }
        self.queue.enqueue_bytes(bytes);
    }

    /// Discard all queued audio and halt the currently playing buffer.
    pub fn interrupt(&self) {
        self.queue.clear();
    }

    /// Silence or restore the output without destroying the queue.
    pub fn set_muted(&self, muted: bool) {
        self.queue.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.queue.is_muted()
    }

    /// Number of samples awaiting playback.
    pub fn queued_samples(&self) -> usize {
        self.queue.queued_samples()
    }

    /// Tear down the output path. Idempotent; the queue survives so a
    /// later `start()` resumes where playback left off.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pcm16_to_bytes;

    #[test]
    fn enqueue_preserves_fifo_order() {
        let queue = PlayoutQueue::new();
        queue.enqueue_bytes(&pcm16_to_bytes(&[100, 200]));
        queue.enqueue_bytes(&pcm16_to_bytes(&[300]));
        assert_eq!(queue.queued_samples(), 3);

        let mut out = [0.0_f32; 3];
        queue.fill(&mut out);
        assert!((out[0] - 100.0 / 32768.0).abs() < 1e-6);
        assert!((out[1] - 200.0 / 32768.0).abs() < 1e-6);
        assert!((out[2] - 300.0 / 32768.0).abs() < 1e-6);
        assert_eq!(queue.queued_samples(), 0);
    }

    #[test]
    fn fill_pads_with_silence_when_dry() {
        let queue = PlayoutQueue::new();
        queue.enqueue_bytes(&pcm16_to_bytes(&[1000]));
        let mut out = [1.0_f32; 4];
        queue.fill(&mut out);
        assert_eq!(&out[1..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn clear_empties_queue_immediately() {
        let queue = PlayoutQueue::new();
        queue.enqueue_bytes(&pcm16_to_bytes(&[1; 4800]));
        assert_eq!(queue.queued_samples(), 4800);
        queue.clear();
        assert_eq!(queue.queued_samples(), 0);
    }

    #[test]
    fn mute_preserves_queue_position() {
        let queue = PlayoutQueue::new();
        queue.enqueue_bytes(&pcm16_to_bytes(&[500, 600]));
        queue.set_muted(true);

        let mut out = [1.0_f32; 2];
        queue.fill(&mut out);
        assert_eq!(out, [0.0, 0.0]);
        // Nothing was consumed while muted.
        assert_eq!(queue.queued_samples(), 2);

        queue.set_muted(false);
        queue.fill(&mut out);
        assert!((out[0] - 500.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn pipeline_queue_usable_before_start() {
        let pipeline = PlaybackPipeline::new(&AudioConfig::default());
        pipeline.enqueue(&pcm16_to_bytes(&[1, 2, 3]));
        assert_eq!(pipeline.queued_samples(), 3);
        pipeline.interrupt();
        assert_eq!(pipeline.queued_samples(), 0);
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let mut pipeline = PlaybackPipeline::new(&AudioConfig::default());
        pipeline.stop().await;
        pipeline.stop().await;
        assert!(!pipeline.is_running());
    }
}
