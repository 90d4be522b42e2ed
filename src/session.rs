//! Realtime session transport
//!
//! Manages the lifecycle of one bidirectional streaming connection to the
//! Gemini Live API over WebSocket: setup handshake, ordered outbound audio
//! frames, inbound event demultiplexing and teardown. Inbound traffic is
//! delivered as [`SessionEvent`]s on an mpsc channel so downstream consumers
//! can run a plain receive loop.

use crate::capture::MediaPayload;
use crate::config::SessionConfig;
use crate::error::{LiveError, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};


const LIVE_API_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Tool the model may invoke to ask for an outbound phone call. Its args
/// carry a `phoneNumber` string; the reply goes back with the matching id.
pub const CONNECT_CALL_TOOL: &str = "connectCall";

type WsSink = Arc<
    Mutex<
        futures_util::stream::SplitSink<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
            Message,
        >,
    >,
>;

type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Inbound event kinds after demultiplexing a raw server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Incremental transcription of the user's speech.
    InputTranscriptionDelta(String),
    /// Incremental transcription of the model's speech.
    OutputTranscriptionDelta(String),
    /// Turn boundary: commit accumulated utterances.
    TurnComplete,
    /// Base64 16-bit PCM, 24 kHz mono.
    AudioDelta(String),
    /// The model requests an out-of-band action.
    ToolCall {
        name: String,
        args: Value,
        call_id: String,
    },
}

/// Lifecycle and content notifications delivered on the session channel.
#[derive(Debug)]
pub enum SessionEvent {
    /// Handshake acknowledged; the server now accepts realtime input.
    Open,
    Event(ServerEvent),
    /// Mid-session transport failure; the session is dead.
    Error(LiveError),
    /// The connection ended (either side).
    Closed,
}

/// Result of parsing one raw server message.
#[derive(Debug, PartialEq)]
enum Inbound {
    SetupComplete,
    GoAway,
    Events(Vec<ServerEvent>),
}

/// Demultiplex one raw server message into zero or more events.
///
/// Within a message, transcription and audio deltas are emitted before the
/// turn boundary so a consumer applying events in order sees the same turn
/// the server described.
fn parse_server_message(raw: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| LiveError::MalformedPayload(e.to_string()))?;

    if value.get("setupComplete").is_some() {
        return Ok(Inbound::SetupComplete);
    }
    if value.get("goAway").is_some() {
        return Ok(Inbound::GoAway);
    }

    let mut events = Vec::new();
    if let Some(content) = value.get("serverContent") {
        if let Some(text) = content
            .pointer("/inputTranscription/text")
            .and_then(Value::as_str)
        {
            events.push(ServerEvent::InputTranscriptionDelta(text.to_string()));
        }
        if let Some(text) = content
            .pointer("/outputTranscription/text")
            .and_then(Value::as_str)
        {
            events.push(ServerEvent::OutputTranscriptionDelta(text.to_string()));
        }
        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(Value::as_array) {
            for part in parts {
                if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
                    events.push(ServerEvent::AudioDelta(data.to_string()));
                }
            }
        }
        if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(calls) = value.pointer("/toolCall/functionCalls").and_then(Value::as_array) {
        for call in calls {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let call_id = call
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = call.get("args").cloned().unwrap_or(Value::Null);
            events.push(ServerEvent::ToolCall { name, args, call_id });
        }
    }

    Ok(Inbound::Events(events))
}

/// Build the session setup message: audio-out modality, transcription on for
/// both directions, the selected voice and the call tool declaration.
fn setup_message(config: &SessionConfig) -> Value {
    json!({
        "setup": {
            "model": config.model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice.as_str() }
                    }
                }
            },
            "systemInstruction": config.system_instruction,
            "inputAudioTranscription": {},
            "outputAudioTranscription": {},
            "tools": [{
                "functionDeclarations": [{
                    "name": CONNECT_CALL_TOOL,
                    "description": "Places an outbound phone call on behalf of the user.",
                    "parameters": {
                        "type": "OBJECT",
                        "properties": {
                            "phoneNumber": { "type": "STRING" }
                        },
                        "required": ["phoneNumber"]
                    }
                }]
            }]
        }
    })
}

fn realtime_input_message(payload: &MediaPayload) -> Value {
    json!({ "realtimeInput": { "audio": payload } })
}

fn tool_response_message(call_id: &str, name: &str, result: &str) -> Value {
    json!({
        "toolResponse": {
            "functionResponses": [{
                "id": call_id,
                "name": name,
                "response": { "result": result }
            }]
        }
    })
}

/// One bidirectional streaming session to the live endpoint.
///
/// Lifecycle: `Disconnected -> Connecting -> Open -> Closed/Errored`. The
/// caller observes Open/Closed/Errored through the event channel handed to
/// [`LiveSession::connect`].
pub struct LiveSession {
    writer: Option<WsSink>,
    reader_task: Option<JoinHandle<()>>,
    sender_task: Option<JoinHandle<()>>,
    open: Arc<AtomicBool>,
}

impl LiveSession {
    /// Connect to the configured endpoint, send the session setup and start
    /// the reader and writer tasks.
    ///
    /// Resolves once the WebSocket handshake completes and the setup message
    /// is on the wire; the server's acknowledgement arrives later as
    /// [`SessionEvent::Open`]. Captured frames read from `frames` are sent
    /// strictly in arrival order; frames arriving before the session is open
    /// are dropped rather than queued (a brief quality blip, not an error).
    pub async fn connect(
        config: &SessionConfig,
        api_key: &str,
        frames: UnboundedReceiver<MediaPayload>,
        events: Sender<SessionEvent>,
    ) -> Result<Self> {
        let url = format!("{}?key={}", LIVE_API_URL, api_key);
        info!("connecting to live endpoint");

        let (ws, _resp) = connect_async(&url)
            .await
            .map_err(|e| LiveError::Connection(e.to_string()))?;
        let (sink, stream) = ws.split();
        let writer: WsSink = Arc::new(Mutex::new(sink));

        let setup = setup_message(config);
        writer
            .lock()
            .await
            .send(Message::text(setup.to_string()))
            .await
            .map_err(|e| LiveError::Connection(e.to_string()))?;
        debug!("session setup sent");

        let open = Arc::new(AtomicBool::new(false));
        let reader_task = tokio::spawn(read_loop(stream, events, open.clone()));
        let sender_task = tokio::spawn(send_loop(frames, writer.clone(), open.clone()));

        Ok(Self {
            writer: Some(writer),
            reader_task: Some(reader_task),
            sender_task: Some(sender_task),
            open,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Deliver the result of a previously received tool invocation.
    /// Best-effort: silently dropped when the session is not open.
    pub async fn send_tool_response(&self, call_id: &str, name: &str, result: &str) {
        if !self.is_open() {
            debug!("dropping tool response, session not open");
            return;
        }
        let Some(writer) = &self.writer else { return };

        let message = tool_response_message(call_id, name, result);
        if let Err(e) = writer
            .lock()
            .await
            .send(Message::text(message.to_string()))
            .await
        {
            warn!("failed to send tool response: {}", e);
        }
    }

    /// Tear the session down: close frame fire-and-forget, stop the reader
    /// and writer tasks, release the sink. Idempotent and safe on a session
    /// that never finished opening.
    pub async fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.lock().await.send(Message::Close(None)).await {
                debug!("close frame not delivered: {}", e);
            }
        }
        if let Some(task) = self.sender_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Read raw server messages in arrival order and forward demultiplexed
/// events. A message that fails to parse is logged and skipped; the session
/// stays up.
async fn read_loop(mut stream: WsStream, events: Sender<SessionEvent>, open: Arc<AtomicBool>) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            // The endpoint also delivers JSON in binary frames.
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("ignoring non-UTF-8 binary frame ({} bytes)", bytes.len());
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!("websocket closed: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("websocket error: {}", e);
                open.store(false, Ordering::Release);
                let _ = events
                    .send(SessionEvent::Error(LiveError::Connection(e.to_string())))
                    .await;
                return;
            }
        };

        match parse_server_message(&text) {
            Ok(Inbound::SetupComplete) => {
                open.store(true, Ordering::Release);
                info!("session handshake complete");
                if events.send(SessionEvent::Open).await.is_err() {
                    return;
                }
            }
            Ok(Inbound::GoAway) => {
                info!("server requested disconnect");
                break;
            }
            Ok(Inbound::Events(batch)) => {
                for event in batch {
                    if events.send(SessionEvent::Event(event)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("skipping malformed server message: {}", e);
            }
        }
    }

    open.store(false, Ordering::Release);
    let _ = events.send(SessionEvent::Closed).await;
}

/// Forward captured frames to the wire in capture order. Frames produced
/// while the session is not yet open are dropped, never queued, so capture
/// cadence stays decoupled from session readiness.
async fn send_loop(
    mut frames: UnboundedReceiver<MediaPayload>,
    writer: WsSink,
    open: Arc<AtomicBool>,
) {
    while let Some(payload) = frames.recv().await {
        if !open.load(Ordering::Acquire) {
            debug!("dropping captured frame, session not open");
            continue;
        }
        let message = realtime_input_message(&payload);
        if let Err(e) = writer
            .lock()
            .await
            .send(Message::text(message.to_string()))
            .await
        {
            warn!("failed to send audio frame: {}", e);
            break;
        }
    }
    debug!("outbound frame loop ended");
}
