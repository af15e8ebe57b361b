//! The conversation client: turn state machine plus the single-threaded
//! event loop that wires the session, the audio pipelines, and the
//! transcript together.
//!
//! All inbound events are processed strictly in arrival order on one
//! task; the capture pipeline is an independent producer whose flushed
//! buffers join the same loop through a channel. This keeps every
//! mutation of shared state (transcript, flags, current-message pointer)
//! on one cooperative scheduler.

use crate::audio::{CapturePipeline, PlaybackPipeline};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::runtime::ClientEvent;
use crate::session::{
    ConnectionManager, ConnectionStatus, InboundEvent, OutboundFrame, StreamMode, StreamSignal,
};
use crate::transcript::{MessageKind, Sender, Transcript};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffer sizes for the loop's input channels.
const SIGNAL_CHANNEL_SIZE: usize = 64;
const FLUSH_CHANNEL_SIZE: usize = 16;
const EVENT_CHANNEL_SIZE: usize = 64;

/// Commands accepted by the running client loop.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// (Re)connect the text-mode stream.
    Connect,
    /// Send a user text message.
    SendText(String),
    /// Start voice mode: open both audio pipelines, reconnect as audio.
    StartVoice,
    /// Stop voice mode: close both pipelines, reconnect as text.
    StopVoice,
    /// Toggle playback mute.
    SetMuted(bool),
    /// Close the session.
    Disconnect,
}

/// Client-visible conversation state.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnState {
    pub connected: bool,
    pub voice_active: bool,
    pub recording: bool,
    pub muted: bool,
    pub typing: bool,
}

/// Turn-based conversation client over one logical session.
pub struct ChatClient {
    session: ConnectionManager,
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    transcript: Transcript,
    state: TurnState,
    /// Transcript id of the agent message currently being built, if any.
    /// At most one text message is open at a time.
    current_agent_msg: Option<String>,
    events: broadcast::Sender<ClientEvent>,
    signal_tx: mpsc::Sender<StreamSignal>,
    signal_rx: mpsc::Receiver<StreamSignal>,
    flush_tx: mpsc::Sender<Vec<u8>>,
    flush_rx: mpsc::Receiver<Vec<u8>>,
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    command_rx: mpsc::UnboundedReceiver<ClientCommand>,
    cancel: CancellationToken,
}

impl ChatClient {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_SIZE);
        let (flush_tx, flush_rx) = mpsc::channel(FLUSH_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Self {
            session: ConnectionManager::new(&config.server),
            capture: CapturePipeline::new(&config.audio, &config.vad, &config.capture),
            playback: PlaybackPipeline::new(&config.audio),
            transcript: Transcript::new(),
            state: TurnState::default(),
            current_agent_msg: None,
            events,
            signal_tx,
            signal_rx,
            flush_tx,
            flush_rx,
            command_tx,
            command_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Sender for driving the running loop from another task.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<ClientCommand> {
        self.command_tx.clone()
    }

    /// Subscribe to observation events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Token that stops the loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current flags.
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// The session transcript.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Connect the inbound stream in text mode.
    ///
    /// # Errors
    ///
    /// Surfaces connection failures as a transcript notice and returns
    /// the underlying error; the transcript keeps any messages already
    /// appended.
    pub async fn connect(&mut self) -> Result<()> {
        self.reconnect(StreamMode::Text).await
    }

    /// Append a user message optimistically, then fire the frame at the
    /// server. The append happens before any network response is
    /// observed and is never rolled back.
    pub fn send_text(&mut self, text: String) {
        let id = self
            .transcript
            .push(Sender::User, text.clone(), MessageKind::Normal);
        self.emit_appended(&id);
        self.session.send(OutboundFrame::Text(text));
    }

    /// Start voice mode.
    ///
    /// Idempotent on the pipelines when voice is already active; still
    /// performs exactly one reconnect if the session's stream mode
    /// differs from audio.
    ///
    /// # Errors
    ///
    /// Pipeline-start failures leave voice off, append a notice, and
    /// propagate; a device acquired before the failure is released.
    pub async fn start_voice(&mut self) -> Result<()> {
        if !self.state.voice_active {
            if let Err(e) = self.playback.start().await {
                self.push_notice(format!("could not start playback: {e}"));
                return Err(e);
            }
            if let Err(e) = self.capture.start(self.flush_tx.clone()).await {
                self.playback.stop().await;
                self.push_notice(format!("could not start microphone: {e}"));
                return Err(e);
            }
            self.state.recording = true;
            self.state.voice_active = true;
            self.emit(ClientEvent::VoiceActive { active: true });
        }

        if self.session.mode() != StreamMode::Audio || !self.state.connected {
            self.reconnect(StreamMode::Audio).await?;
        }
        Ok(())
    }

    /// Stop voice mode: flush and release both pipelines, then reconnect
    /// the stream in text mode.
    pub async fn stop_voice(&mut self) -> Result<()> {
        if !self.state.voice_active {
            return Ok(());
        }

        self.capture.stop().await;
        // The capture task's final flush is already queued; forward it
        // before recording goes false so trailing speech is not lost.
        while let Ok(buffer) = self.flush_rx.try_recv() {
            if self.state.connected {
                self.session.send(OutboundFrame::Audio(buffer));
            }
        }
        self.playback.stop().await;

        self.state.recording = false;
        self.state.voice_active = false;
        self.emit(ClientEvent::VoiceActive { active: false });

        if self.session.mode() != StreamMode::Text || !self.state.connected {
            self.reconnect(StreamMode::Text).await?;
        }
        Ok(())
    }

    /// Mute or unmute agent playback without destroying the queue.
    pub fn set_muted(&mut self, muted: bool) {
        self.state.muted = muted;
        self.playback.set_muted(muted);
        self.emit(ClientEvent::Muted { muted });
    }

    /// Close the session. Stops both audio pipelines first when a voice
    /// conversation is active. Idempotent; only a fresh connect revives
    /// the client.
    pub async fn disconnect(&mut self) {
        if self.state.voice_active {
            self.capture.stop().await;
            self.playback.stop().await;
            self.state.recording = false;
            self.state.voice_active = false;
            self.emit(ClientEvent::VoiceActive { active: false });
        }
        self.session.disconnect().await;
        self.state.connected = false;
        self.state.typing = false;
        self.current_agent_msg = None;
        self.emit(ClientEvent::Status(ConnectionStatus::Closed));
    }

    /// Run the event loop until the cancel token fires.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.disconnect().await;
                    break;
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command).await;
                }
                Some(signal) = self.signal_rx.recv() => {
                    self.handle_signal(signal);
                }
                Some(buffer) = self.flush_rx.recv() => {
                    // Audio frames only leave while the stream is open in
                    // audio mode and capture is recording.
                    if self.state.connected
                        && self.state.recording
                        && self.session.mode() == StreamMode::Audio
                    {
                        self.session.send(OutboundFrame::Audio(buffer));
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: ClientCommand) {
        let outcome = match command {
            ClientCommand::Connect => self.connect().await,
            ClientCommand::SendText(text) => {
                self.send_text(text);
                Ok(())
            }
            ClientCommand::StartVoice => self.start_voice().await,
            ClientCommand::StopVoice => self.stop_voice().await,
            ClientCommand::SetMuted(muted) => {
                self.set_muted(muted);
                Ok(())
            }
            ClientCommand::Disconnect => {
                self.disconnect().await;
                Ok(())
            }
        };
        if let Err(e) = outcome {
            warn!("command failed: {e}");
        }
    }

    /// Route one stream signal. Events arriving after the session closed
    /// are ignored until a fresh connect.
    fn handle_signal(&mut self, signal: StreamSignal) {
        match signal {
            StreamSignal::Event(event) => {
                if !self.state.connected {
                    debug!("ignoring event on closed session");
                    return;
                }
                self.handle_inbound(event);
            }
            StreamSignal::Closed { error } => {
                self.state.connected = false;
                self.state.typing = false;
                self.current_agent_msg = None;
                match error {
                    Some(e) => {
                        self.push_notice(format!("connection lost: {e}"));
                        self.emit(ClientEvent::Status(ConnectionStatus::Errored));
                    }
                    None => {
                        self.push_notice("stream closed by server".to_owned());
                        self.emit(ClientEvent::Status(ConnectionStatus::Closed));
                    }
                }
            }
        }
    }

    fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::TextDelta(text) => match self.current_agent_msg.clone() {
                Some(id) => {
                    self.transcript.append_to(&id, &text);
                    self.emit(ClientEvent::MessageUpdated { id, delta: text });
                }
                None => {
                    let id = self.transcript.push(Sender::Agent, text, MessageKind::Normal);
                    self.current_agent_msg = Some(id.clone());
                    self.state.typing = true;
                    self.emit_appended(&id);
                    self.emit(ClientEvent::Typing { active: true });
                }
            },
            InboundEvent::TurnComplete => {
                self.current_agent_msg = None;
                self.state.typing = false;
                self.emit(ClientEvent::Typing { active: false });
            }
            InboundEvent::Interrupted => {
                self.current_agent_msg = None;
                self.state.typing = false;
                self.playback.interrupt();
                self.emit(ClientEvent::Typing { active: false });
                self.emit(ClientEvent::PlaybackInterrupted);
            }
            InboundEvent::AudioChunk(bytes) => {
                if self.state.muted {
                    debug!("dropping agent audio while muted");
                } else if self.state.voice_active {
                    self.playback.enqueue(&bytes);
                } else {
                    debug!("dropping agent audio outside voice mode");
                }
            }
        }
    }

    async fn reconnect(&mut self, mode: StreamMode) -> Result<()> {
        self.emit(ClientEvent::Status(ConnectionStatus::Connecting));
        match self.session.connect(mode, self.signal_tx.clone()).await {
            Ok(()) => {
                self.state.connected = true;
                self.emit(ClientEvent::Status(ConnectionStatus::Open));
                Ok(())
            }
            Err(e) => {
                self.state.connected = false;
                self.push_notice(format!("connection failed: {e}"));
                self.emit(ClientEvent::Status(ConnectionStatus::Errored));
                Err(e)
            }
        }
    }

    /// Append a system notice so the user always has a textual record of
    /// connectivity changes.
    fn push_notice(&mut self, text: String) {
        let id = self.transcript.push(Sender::Agent, text, MessageKind::Notice);
        self.emit_appended(&id);
    }

    fn emit_appended(&mut self, id: &str) {
        if let Some(message) = self.transcript.get(id) {
            let message = message.clone();
            self.emit(ClientEvent::MessageAppended(message));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No receivers is fine; observation is optional.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pcm16_to_bytes;

    fn connected_client() -> ChatClient {
        let mut client = ChatClient::new(ClientConfig::default());
        client.state.connected = true;
        client
    }

    fn agent_messages(client: &ChatClient) -> Vec<&str> {
        client
            .transcript()
            .messages()
            .iter()
            .filter(|m| m.sender == Sender::Agent && m.kind == MessageKind::Normal)
            .map(|m| m.content.as_str())
            .collect()
    }

    #[tokio::test]
    async fn deltas_accumulate_into_single_message() {
        let mut client = connected_client();
        client.handle_signal(StreamSignal::Event(InboundEvent::TextDelta("A".into())));
        assert!(client.state().typing);
        client.handle_signal(StreamSignal::Event(InboundEvent::TextDelta("B".into())));
        client.handle_signal(StreamSignal::Event(InboundEvent::TurnComplete));

        assert_eq!(agent_messages(&client), vec!["AB"]);
        assert!(!client.state().typing);
    }

    #[tokio::test]
    async fn turn_complete_starts_fresh_message_on_next_delta() {
        let mut client = connected_client();
        client.handle_signal(StreamSignal::Event(InboundEvent::TextDelta("first".into())));
        client.handle_signal(StreamSignal::Event(InboundEvent::TurnComplete));
        client.handle_signal(StreamSignal::Event(InboundEvent::TextDelta("second".into())));

        assert_eq!(agent_messages(&client), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn interrupted_flushes_playback_queue() {
        let mut client = connected_client();
        client.state.voice_active = true;
        client.handle_signal(StreamSignal::Event(InboundEvent::TextDelta("Hello".into())));
        client.handle_signal(StreamSignal::Event(InboundEvent::AudioChunk(
            pcm16_to_bytes(&[1000; 2400]),
        )));
        assert!(client.playback.queued_samples() > 0);

        client.handle_signal(StreamSignal::Event(InboundEvent::Interrupted));
        assert_eq!(client.playback.queued_samples(), 0);
        assert!(!client.state().typing);

        // The interrupted reply stays in the transcript; the next delta
        // opens a new message.
        client.handle_signal(StreamSignal::Event(InboundEvent::TextDelta("again".into())));
        assert_eq!(agent_messages(&client), vec!["Hello", "again"]);
    }

    #[tokio::test]
    async fn audio_chunks_dropped_while_muted() {
        let mut client = connected_client();
        client.state.voice_active = true;
        client.set_muted(true);
        client.handle_signal(StreamSignal::Event(InboundEvent::AudioChunk(
            pcm16_to_bytes(&[1000; 480]),
        )));
        assert_eq!(client.playback.queued_samples(), 0);
    }

    #[tokio::test]
    async fn audio_chunks_queue_during_playback_start_race() {
        // Chunks arriving while the output device is still opening are
        // queued, not dropped: the queue exists before the device does.
        let mut client = connected_client();
        client.state.voice_active = true;
        client.handle_signal(StreamSignal::Event(InboundEvent::AudioChunk(
            pcm16_to_bytes(&[1000; 480]),
        )));
        assert_eq!(client.playback.queued_samples(), 480);
    }

    #[tokio::test]
    async fn optimistic_send_survives_failed_connect() {
        // Port 1 refuses connections, so the liveness check fails.
        let mut config = ClientConfig::default();
        config.server.base_url = "http://127.0.0.1:1".to_owned();
        let mut client = ChatClient::new(config);

        client.send_text("hi".to_owned());
        assert_eq!(client.transcript().len(), 1);
        assert_eq!(client.transcript().messages()[0].content, "hi");

        let result = client.connect().await;
        assert!(matches!(
            result,
            Err(crate::error::ChannelError::ServerUnreachable(_))
        ));

        // The optimistic message is still first; the failure notice was
        // appended after it, never in place of it.
        let messages = client.transcript().messages();
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[0].sender, Sender::User);
        assert!(messages.len() >= 2);
        assert_eq!(messages[1].kind, MessageKind::Notice);
    }

    #[tokio::test]
    async fn stream_error_surfaces_notice_and_stops_event_handling() {
        let mut client = connected_client();
        client.handle_signal(StreamSignal::Closed {
            error: Some("connection reset".into()),
        });
        assert!(!client.state().connected);
        let last = client.transcript().last().expect("notice appended");
        assert_eq!(last.kind, MessageKind::Notice);
        assert!(last.content.contains("connection lost"));

        // Late events on the dead stream are ignored.
        client.handle_signal(StreamSignal::Event(InboundEvent::TextDelta("late".into())));
        assert!(agent_messages(&client).is_empty());
    }

    #[tokio::test]
    async fn start_voice_when_already_audio_is_pure_noop() {
        let mut client = connected_client();
        client.state.voice_active = true;
        client.state.recording = true;
        client.session.set_mode_for_tests(StreamMode::Audio);

        let before = client.transcript().len();
        client.start_voice().await.expect("no-op");
        // No reconnect, no notices, pipelines untouched.
        assert_eq!(client.transcript().len(), before);
        assert!(!client.playback.is_running());
        assert!(client.state().voice_active);
    }

    #[tokio::test]
    async fn start_voice_with_stale_text_mode_reconnects_once() {
        let mut config = ClientConfig::default();
        config.server.base_url = "http://127.0.0.1:1".to_owned();
        let mut client = ChatClient::new(config);
        client.state.connected = true;
        client.state.voice_active = true;

        // Session mode is still text, so exactly one reconnect is
        // attempted; against a dead server it fails with one notice.
        let result = client.start_voice().await;
        assert!(result.is_err());
        let notices = client
            .transcript()
            .messages()
            .iter()
            .filter(|m| m.kind == MessageKind::Notice)
            .count();
        assert_eq!(notices, 1);
        assert!(!client.state().connected);
    }

    #[tokio::test]
    async fn stop_voice_without_start_is_noop() {
        let mut client = connected_client();
        client.stop_voice().await.expect("noop stop");
        assert!(!client.state().voice_active);
        assert!(!client.state().recording);
    }
}
