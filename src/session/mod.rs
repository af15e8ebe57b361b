//! Session connection management: liveness check, the inbound SSE event
//! stream, and outbound frame delivery.
//!
//! One stream may be open per session. Mode switches (text <-> audio) are
//! implemented as reconnect-with-new-mode; there is no in-place change.
//! There is no automatic reconnect on stream error: resuming a voice
//! session silently could come back in the wrong mode or duplicate audio
//! frames, so the error is surfaced and the user retries explicitly.

pub mod events;

pub use events::{InboundEvent, OutboundFrame, StreamMode};

use crate::config::ServerConfig;
use crate::error::{ChannelError, Result};
use crate::sse::SseDecoder;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of the session's inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    Errored,
}

/// What the stream reader delivers to the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// A parsed inbound event, in arrival order.
    Event(InboundEvent),
    /// The stream ended. `error` is set when it dropped mid-session
    /// rather than closing cleanly.
    Closed { error: Option<String> },
}

/// Running stream reader state.
struct StreamTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the session: one inbound server-push stream plus the outbound
/// request channel, keyed by a per-session client id.
pub struct ConnectionManager {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    mode: StreamMode,
    status: ConnectionStatus,
    stream: Option<StreamTask>,
}

impl ConnectionManager {
    /// Create a disconnected session with a fresh random client id.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            client_id: uuid::Uuid::new_v4().to_string(),
            mode: StreamMode::Text,
            status: ConnectionStatus::Closed,
            stream: None,
        }
    }

    /// The session's stable client id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Mode of the currently (or last) open stream.
    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    #[cfg(test)]
    pub(crate) fn set_mode_for_tests(&mut self, mode: StreamMode) {
        self.mode = mode;
    }

    /// Liveness check against the agent endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ServerUnreachable`] on any transport
    /// failure or non-2xx response.
    pub async fn check_health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::ServerUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::ServerUnreachable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Open the inbound stream in the given mode, closing any stream that
    /// is already open. Parsed events arrive on `signal_tx` in arrival
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ServerUnreachable`] when the liveness check
    /// fails (the stream is never attempted), or [`ChannelError::Stream`]
    /// when the stream request itself is refused. Either way the session
    /// is left in [`ConnectionStatus::Errored`].
    pub async fn connect(
        &mut self,
        mode: StreamMode,
        signal_tx: mpsc::Sender<StreamSignal>,
    ) -> Result<()> {
        if let Err(e) = self.check_health().await {
            self.status = ConnectionStatus::Errored;
            return Err(e);
        }

        self.close_stream().await;
        self.status = ConnectionStatus::Connecting;

        let url = format!(
            "{}/events/{}?is_audio={}",
            self.base_url,
            self.client_id,
            mode.is_audio_flag()
        );
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                self.status = ConnectionStatus::Errored;
                return Err(ChannelError::Stream(format!("failed to open stream: {e}")));
            }
        };
        if !response.status().is_success() {
            self.status = ConnectionStatus::Errored;
            return Err(ChannelError::Stream(format!(
                "stream request returned {}",
                response.status()
            )));
        }

        let cancel = CancellationToken::new();
        let reader_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            read_stream(response, signal_tx, reader_cancel).await;
        });

        self.stream = Some(StreamTask { cancel, handle });
        self.mode = mode;
        self.status = ConnectionStatus::Open;
        info!("stream open (mode: {mode:?})");
        Ok(())
    }

    /// Deliver one frame to the session's outbound endpoint.
    ///
    /// Fire-and-forget: the request runs in the background with no retry
    /// and no delivery guarantee. Failures are logged and never block
    /// subsequent sends.
    pub fn send(&self, frame: OutboundFrame) {
        let url = format!("{}/send/{}", self.base_url, self.client_id);
        let http = self.http.clone();
        let body = frame.to_wire();

        tokio::spawn(async move {
            match http.post(&url).json(&body).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!("send failed: server returned {}", response.status());
                }
                Ok(_) => debug!("frame sent ({})", body.mime_type),
                Err(e) => warn!("send failed: {e}"),
            }
        });
    }

    /// Close the inbound stream and mark the session closed. Idempotent.
    pub async fn disconnect(&mut self) {
        self.close_stream().await;
        if self.status != ConnectionStatus::Closed {
            info!("session disconnected");
        }
        self.status = ConnectionStatus::Closed;
    }

    async fn close_stream(&mut self) {
        if let Some(task) = self.stream.take() {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }
}

/// Drain the SSE byte stream, forwarding parsed events in arrival order.
///
/// Malformed events are logged and dropped; they never tear down the
/// stream. A local cancel produces no signal; only a remote close or a
/// transport error does.
async fn read_stream(
    response: reqwest::Response,
    signal_tx: mpsc::Sender<StreamSignal>,
    cancel: CancellationToken,
) {
    let mut decoder = SseDecoder::new();
    let mut bytes = response.bytes_stream();

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            chunk = bytes.next() => match chunk {
                Some(Ok(chunk)) => {
                    for payload in decoder.push(&chunk) {
                        match InboundEvent::parse(&payload) {
                            Ok(event) => {
                                if signal_tx.send(StreamSignal::Event(event)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!("dropping malformed event: {e}"),
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = signal_tx
                        .send(StreamSignal::Closed {
                            error: Some(e.to_string()),
                        })
                        .await;
                    return;
                }
                None => {
                    if let Some(payload) = decoder.flush() {
                        match InboundEvent::parse(&payload) {
                            Ok(event) => {
                                let _ = signal_tx.send(StreamSignal::Event(event)).await;
                            }
                            Err(e) => warn!("dropping malformed event: {e}"),
                        }
                    }
                    let _ = signal_tx.send(StreamSignal::Closed { error: None }).await;
                    return;
                }
            }
        }
    }
}
