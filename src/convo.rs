//! Conversation state machine
//!
//! Sequences the capture pipeline, session transport, playback scheduler and
//! transcript assembler for one conversation, and owns all of its mutable
//! state. Every mutation happens either in [`Conversation::handle_event`]
//! (driven by the session's event channel, in arrival order) or in an
//! explicit user operation, so no locking is needed around the state set.

use crate::capture::{self, CaptureHandle};
use crate::codec;
use crate::config::{ClosePolicy, SessionConfig};
use crate::error::{LiveError, Result};
use crate::playback::{AudioClock, OutputSink, PlaybackScheduler, OUTPUT_RATE};
use crate::session::{LiveSession, ServerEvent, SessionEvent, CONNECT_CALL_TOOL};
use crate::transcript::{Speaker, Transcript, TranscriptEntry, TurnAssembler};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Current phase of the conversation; exactly one value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Idle,
    Connecting,
    Listening,
    Speaking,
    Calling,
    Error,
}

/// A tool-initiated phone call awaiting resolution or cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallingRequest {
    pub phone_number: String,
    pub call_id: String,
}

/// One conversation's entire mutable state: status, transcript, in-flight
/// utterances, playback cursor and the transport/capture handles.
pub struct Conversation<C: AudioClock, S: OutputSink> {
    config: SessionConfig,
    status: ConversationStatus,
    error_message: Option<String>,
    transcript: Transcript,
    assembler: TurnAssembler,
    scheduler: PlaybackScheduler<C, S>,
    session: Option<LiveSession>,
    capture: Option<CaptureHandle>,
    pending_call: Option<CallingRequest>,
}

impl<C: AudioClock, S: OutputSink> Conversation<C, S> {
    pub fn new(config: SessionConfig, clock: Arc<C>, sink: Arc<S>) -> Self {
        Self {
            config,
            status: ConversationStatus::Idle,
            error_message: None,
            transcript: Transcript::new(),
            assembler: TurnAssembler::new(),
            scheduler: PlaybackScheduler::new(clock, sink),
            session: None,
            capture: None,
            pending_call: None,
        }
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.transcript.entries()
    }

    pub fn pending_call(&self) -> Option<&CallingRequest> {
        self.pending_call.as_ref()
    }

    pub fn active_playback_sources(&self) -> usize {
        self.scheduler.active_sources()
    }

    /// Start a conversation: acquire the microphone and connect the session.
    ///
    /// Returns the channel of session events the caller must consume and
    /// feed back through [`Conversation::handle_event`]. On failure the
    /// conversation transitions to `Error` and is fully torn down.
    pub async fn start(&mut self, api_key: &str) -> Result<mpsc::Receiver<SessionEvent>> {
        if !matches!(
            self.status,
            ConversationStatus::Idle | ConversationStatus::Error
        ) {
            return Err(LiveError::Setup(
                "conversation already in progress".to_string(),
            ));
        }
        self.error_message = None;
        self.status = ConversationStatus::Connecting;

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);

        match capture::spawn_capture(frame_tx) {
            Ok(handle) => self.capture = Some(handle),
            Err(e) => {
                self.fail(e.to_string()).await;
                return Err(e);
            }
        }

        match LiveSession::connect(&self.config, api_key, frame_rx, event_tx).await {
            Ok(session) => {
                self.session = Some(session);
                Ok(event_rx)
            }
            Err(e) => {
                self.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Consume one session event, in arrival order.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Open => {
                info!("session open, listening");
                self.status = ConversationStatus::Listening;
            }
            SessionEvent::Event(event) => self.handle_server_event(event),
            SessionEvent::Error(e) => {
                warn!("session error: {}", e);
                self.fail(e.to_string()).await;
            }
            SessionEvent::Closed => {
                info!("session closed by remote");
                self.teardown().await;
                if self.config.close_policy == ClosePolicy::ClearTranscript {
                    self.transcript.clear();
                }
                self.assembler.clear();
                self.status = ConversationStatus::Idle;
            }
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::InputTranscriptionDelta(text) => {
                self.assembler.push_input_delta(&text);
                if self.status != ConversationStatus::Calling {
                    self.status = ConversationStatus::Listening;
                }
            }
            ServerEvent::OutputTranscriptionDelta(text) => {
                self.assembler.push_output_delta(&text);
                if self.status != ConversationStatus::Calling {
                    self.status = ConversationStatus::Speaking;
                }
            }
            ServerEvent::TurnComplete => {
                self.assembler.commit_turn(&mut self.transcript);
                if self.status != ConversationStatus::Calling {
                    self.status = ConversationStatus::Listening;
                }
            }
            ServerEvent::AudioDelta(data) => match codec::decode(&data) {
                Ok(bytes) => {
                    let buffer = codec::decode_audio_data(&bytes, OUTPUT_RATE, 1);
                    self.scheduler.schedule(buffer);
                }
                // One bad payload is dropped; the session keeps going.
                Err(e) => warn!("skipping malformed audio delta: {}", e),
            },
            ServerEvent::ToolCall { name, args, call_id } => {
                self.handle_tool_call(&name, &args, call_id)
            }
        }
    }

    fn handle_tool_call(&mut self, name: &str, args: &Value, call_id: String) {
        if name != CONNECT_CALL_TOOL {
            warn!("ignoring unknown tool call: {}", name);
            return;
        }
        let phone_number = args
            .get("phoneNumber")
            .and_then(Value::as_str)
            .unwrap_or("the payment line")
            .to_string();

        info!("call requested to {} ({})", phone_number, call_id);
        self.transcript.push(
            Speaker::System,
            format!("Connecting call to {}...", phone_number),
        );
        self.pending_call = Some(CallingRequest {
            phone_number,
            call_id,
        });
        self.status = ConversationStatus::Calling;
    }

    /// Mark the pending call as connected: reply to the tool invocation,
    /// note it in the transcript and return to listening. No-op when no call
    /// is pending.
    pub async fn resolve_call(&mut self) {
        let Some(call) = self.pending_call.take() else {
            return;
        };
        if let Some(session) = &self.session {
            session
                .send_tool_response(
                    &call.call_id,
                    CONNECT_CALL_TOOL,
                    "ok, the user has been connected.",
                )
                .await;
        }
        self.transcript.push(
            Speaker::System,
            format!("Call to {} connected.", call.phone_number),
        );
        self.status = ConversationStatus::Listening;
    }

    /// Cancel the pending call on the user's behalf. No-op when no call is
    /// pending.
    pub async fn cancel_call(&mut self) {
        let Some(call) = self.pending_call.take() else {
            return;
        };
        if let Some(session) = &self.session {
            session
                .send_tool_response(
                    &call.call_id,
                    CONNECT_CALL_TOOL,
                    "ok, the user cancelled the call.",
                )
                .await;
        }
        self.transcript.push(Speaker::System, "Call cancelled.");
        self.status = ConversationStatus::Listening;
    }

    /// User-initiated stop: full teardown, transcript cleared.
    pub async fn stop(&mut self) {
        self.teardown().await;
        self.transcript.clear();
        self.assembler.clear();
        self.status = ConversationStatus::Idle;
    }

    async fn fail(&mut self, message: String) {
        self.teardown().await;
        self.error_message = Some(message);
        self.status = ConversationStatus::Error;
    }

    /// Release the session, the microphone and all scheduled playback.
    /// Safe to call repeatedly or before anything was started; afterwards no
    /// partial state survives.
    pub async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        self.scheduler.teardown();
        self.pending_call = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AudioBuffer;
    use serde_json::json;
    use std::sync::Mutex;

    struct ManualClock(Mutex<f64>);

    impl AudioClock for ManualClock {
        fn now(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    struct NullSink;

    impl OutputSink for NullSink {
        fn write(&self, _buffer: &AudioBuffer) {}
    }

    fn test_convo() -> Conversation<ManualClock, NullSink> {
        let config = SessionConfig::new(crate::config::Voice::Zephyr, "prompt");
        Conversation::new(
            config,
            Arc::new(ManualClock(Mutex::new(0.0))),
            Arc::new(NullSink),
        )
    }

    fn test_convo_with_policy(policy: ClosePolicy) -> Conversation<ManualClock, NullSink> {
        let mut config = SessionConfig::new(crate::config::Voice::Zephyr, "prompt");
        config.close_policy = policy;
        Conversation::new(
            config,
            Arc::new(ManualClock(Mutex::new(0.0))),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_status_walk_through_a_turn() {
        let mut convo = test_convo();
        assert_eq!(convo.status(), ConversationStatus::Idle);

        convo.status = ConversationStatus::Connecting;
        convo.handle_event(SessionEvent::Open).await;
        assert_eq!(convo.status(), ConversationStatus::Listening);

        convo
            .handle_event(SessionEvent::Event(ServerEvent::OutputTranscriptionDelta(
                "hello".to_string(),
            )))
            .await;
        assert_eq!(convo.status(), ConversationStatus::Speaking);

        convo
            .handle_event(SessionEvent::Event(ServerEvent::InputTranscriptionDelta(
                "hi".to_string(),
            )))
            .await;
        assert_eq!(convo.status(), ConversationStatus::Listening);

        convo
            .handle_event(SessionEvent::Event(ServerEvent::TurnComplete))
            .await;
        assert_eq!(convo.status(), ConversationStatus::Listening);
        assert_eq!(convo.transcript().len(), 2);
        assert_eq!(convo.transcript()[0].speaker, Speaker::User);
        assert_eq!(convo.transcript()[1].speaker, Speaker::Ai);

        convo.stop().await;
        assert_eq!(convo.status(), ConversationStatus::Idle);
        assert!(convo.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_handshake_failure_lands_in_error_state() {
        let mut convo = test_convo();
        convo.status = ConversationStatus::Connecting;

        convo
            .handle_event(SessionEvent::Error(LiveError::Connection(
                "handshake refused".to_string(),
            )))
            .await;

        assert_eq!(convo.status(), ConversationStatus::Error);
        assert!(convo.error_message().unwrap().contains("handshake refused"));
        assert_eq!(convo.active_playback_sources(), 0);
        assert!(convo.session.is_none());
        assert!(convo.capture.is_none());
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut convo = test_convo();
        convo
            .handle_event(SessionEvent::Event(ServerEvent::AudioDelta(
                codec::encode(&vec![0u8; 48_000]),
            )))
            .await;
        assert_eq!(convo.active_playback_sources(), 1);

        convo.teardown().await;
        convo.teardown().await;
        assert_eq!(convo.active_playback_sources(), 0);
        assert!(convo.session.is_none());
        assert!(convo.capture.is_none());
    }

    #[tokio::test]
    async fn test_audio_delta_advances_playback_cursor() {
        let mut convo = test_convo();

        // One second of 24 kHz mono s16le.
        let pcm = vec![0u8; OUTPUT_RATE as usize * 2];
        convo
            .handle_event(SessionEvent::Event(ServerEvent::AudioDelta(
                codec::encode(&pcm),
            )))
            .await;
        assert!((convo.scheduler.cursor() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_malformed_audio_delta_is_skipped_not_fatal() {
        let mut convo = test_convo();
        convo.status = ConversationStatus::Listening;

        convo
            .handle_event(SessionEvent::Event(ServerEvent::AudioDelta(
                "@@not base64@@".to_string(),
            )))
            .await;

        assert_eq!(convo.status(), ConversationStatus::Listening);
        assert_eq!(convo.active_playback_sources(), 0);
        assert_eq!(convo.scheduler.cursor(), 0.0);
    }

    #[tokio::test]
    async fn test_tool_call_enters_calling_and_cancel_returns() {
        let mut convo = test_convo();
        convo.status = ConversationStatus::Listening;

        convo
            .handle_event(SessionEvent::Event(ServerEvent::ToolCall {
                name: CONNECT_CALL_TOOL.to_string(),
                args: json!({"phoneNumber": "+1 555 0100"}),
                call_id: "fc-9".to_string(),
            }))
            .await;

        assert_eq!(convo.status(), ConversationStatus::Calling);
        let call = convo.pending_call().unwrap();
        assert_eq!(call.phone_number, "+1 555 0100");
        assert_eq!(call.call_id, "fc-9");
        assert_eq!(convo.transcript().len(), 1);
        assert_eq!(convo.transcript()[0].speaker, Speaker::System);

        // Deltas while calling do not yank the status away.
        convo
            .handle_event(SessionEvent::Event(ServerEvent::OutputTranscriptionDelta(
                "one moment".to_string(),
            )))
            .await;
        assert_eq!(convo.status(), ConversationStatus::Calling);

        convo.cancel_call().await;
        assert_eq!(convo.status(), ConversationStatus::Listening);
        assert!(convo.pending_call().is_none());
        assert_eq!(convo.transcript().last().unwrap().text, "Call cancelled.");
    }

    #[tokio::test]
    async fn test_resolve_call_notes_connection() {
        let mut convo = test_convo();
        convo.status = ConversationStatus::Calling;
        convo.pending_call = Some(CallingRequest {
            phone_number: "+1 555 0100".to_string(),
            call_id: "fc-9".to_string(),
        });

        convo.resolve_call().await;
        assert_eq!(convo.status(), ConversationStatus::Listening);
        assert!(convo.transcript().last().unwrap().text.contains("connected"));

        // Resolving again is a no-op.
        let entries = convo.transcript().len();
        convo.resolve_call().await;
        assert_eq!(convo.transcript().len(), entries);
    }

    #[tokio::test]
    async fn test_events_keep_flowing_while_call_rings() {
        let mut convo = test_convo();
        convo.status = ConversationStatus::Calling;
        convo.pending_call = Some(CallingRequest {
            phone_number: "+1 555 0100".to_string(),
            call_id: "fc-9".to_string(),
        });

        // Audio and transcription arriving mid-ring are still applied.
        let pcm = vec![0u8; OUTPUT_RATE as usize * 2];
        convo
            .handle_event(SessionEvent::Event(ServerEvent::AudioDelta(
                codec::encode(&pcm),
            )))
            .await;
        convo
            .handle_event(SessionEvent::Event(ServerEvent::OutputTranscriptionDelta(
                "dialing now".to_string(),
            )))
            .await;
        assert!((convo.scheduler.cursor() - 1.0).abs() < 1e-9);

        convo.resolve_call().await;
        convo
            .handle_event(SessionEvent::Event(ServerEvent::TurnComplete))
            .await;
        assert_eq!(convo.status(), ConversationStatus::Listening);
        assert_eq!(
            convo.transcript().last().unwrap().text,
            "dialing now"
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_call_is_ignored() {
        let mut convo = test_convo();
        convo.status = ConversationStatus::Listening;

        convo
            .handle_event(SessionEvent::Event(ServerEvent::ToolCall {
                name: "orderPizza".to_string(),
                args: json!({}),
                call_id: "fc-1".to_string(),
            }))
            .await;

        assert_eq!(convo.status(), ConversationStatus::Listening);
        assert!(convo.pending_call().is_none());
    }

    #[tokio::test]
    async fn test_remote_close_preserves_transcript_by_default() {
        let mut convo = test_convo();
        convo.status = ConversationStatus::Listening;
        convo.transcript.push(Speaker::User, "evidence");

        convo.handle_event(SessionEvent::Closed).await;
        assert_eq!(convo.status(), ConversationStatus::Idle);
        assert_eq!(convo.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_close_clears_transcript_under_clear_policy() {
        let mut convo = test_convo_with_policy(ClosePolicy::ClearTranscript);
        convo.status = ConversationStatus::Listening;
        convo.transcript.push(Speaker::User, "evidence");

        convo.handle_event(SessionEvent::Closed).await;
        assert_eq!(convo.status(), ConversationStatus::Idle);
        assert!(convo.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_user_stop_always_clears_transcript() {
        let mut convo = test_convo();
        convo.status = ConversationStatus::Listening;
        convo.transcript.push(Speaker::Ai, "goodbye");
        convo.assembler.push_input_delta("half an utter");

        convo.stop().await;
        assert_eq!(convo.status(), ConversationStatus::Idle);
        assert!(convo.transcript().is_empty());
        assert!(convo.assembler.is_empty());
    }
}
