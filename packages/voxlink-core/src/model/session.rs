//! Model streaming session: one WebSocket per call, reconnect-transparent.
//!
//! A [`GeminiSession`] owns the socket to the model and exposes a typed
//! duplex interface: non-blocking sends on one side, an ordered event stream
//! on the other. A single driver task services the socket; it hides session
//! handovers (GoAway) and transient disconnects behind resumption handles so
//! the orchestrator only sees a short blackout, surfaced as
//! [`ModelEvent::Reconnected`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::config::SessionConfig;
use super::protocol::{self, FunctionCall, ServerMessage, ToolScheduling};
use crate::protocol_constants::{
    AUDIO_QUEUE_FRAMES, MODEL_EVENT_CHANNEL_CAPACITY, RECONNECT_BASE_DELAY_MS,
    RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_DELAY_MS, SETUP_ACK_TIMEOUT_SECS,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from the model session.
///
/// Only `Transport` is transient; everything else fails the call without
/// retries.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model authentication failed: {0}")]
    Auth(String),

    #[error("Model rejected session configuration: {0}")]
    InvalidConfig(String),

    #[error("Requested model unavailable: {0}")]
    IncompatibleModel(String),

    #[error("Model protocol violation: {0}")]
    Protocol(String),

    #[error("Model transport error: {0}")]
    Transport(String),

    #[error("Timed out waiting for setup acknowledgement")]
    SetupTimeout,
}

impl ModelError {
    /// Machine-readable error code, used as the persisted failure reason.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::InvalidConfig(_) => "invalid_config",
            Self::IncompatibleModel(_) => "incompatible_model",
            Self::Protocol(_) => "protocol",
            Self::Transport(_) => "transport",
            Self::SetupTimeout => "setup_timeout",
        }
    }

    /// True when reconnection with a resumption handle may recover.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::SetupTimeout)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean close, either side.
    Normal,
    /// Transport gave out and reconnection was exhausted.
    TransportLost(String),
}

/// Typed events delivered to the orchestrator, in arrival order.
#[derive(Debug)]
pub enum ModelEvent {
    /// Model speech, PCM s16le at 24 kHz.
    AudioOut(Bytes),
    /// Transcription of caller audio.
    InputTranscription(String),
    /// Transcription of model speech.
    OutputTranscription(String),
    /// Caller barged in; buffered AudioOut has already been discarded.
    Interrupted,
    TurnComplete,
    GenerationComplete,
    ToolCall(FunctionCall),
    /// The server issued a fresh resumption handle.
    ResumptionUpdate { handle: String, resumable: bool },
    /// Session time budget warning; the session begins draining.
    GoAway { time_left: Duration },
    /// An invisible handover or reconnect finished; audio flows again.
    Reconnected { blackout: Duration },
    Closed(CloseReason),
    Error(ModelError),
}

/// Outcome of a non-blocking audio send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAudio {
    Queued,
    /// Queue was full; the oldest frame was dropped to make room.
    DroppedOldest,
    /// Session is draining toward a handover; frame refused.
    Draining,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Duplex interface the orchestrator holds toward the model leg.
#[async_trait]
pub trait ModelTransport: Send {
    /// Next event, ordered. `None` once the session has fully shut down.
    async fn receive(&mut self) -> Option<ModelEvent>;

    /// Enqueues caller audio (PCM s16le 16 kHz). Never blocks.
    fn send_audio(&self, pcm16k: Bytes) -> SendAudio;

    /// Injects a synthetic user text turn.
    fn send_text(&self, text: &str);

    /// Completes a tool call initiated by the model.
    fn send_tool_response(&self, id: &str, name: &str, response: &Value, scheduling: ToolScheduling);

    /// Manual turn markers; meaningful only when automatic VAD is disabled.
    fn signal_activity_start(&self);
    fn signal_activity_end(&self);

    /// Announces intentional inbound silence.
    fn signal_audio_stream_end(&self);

    /// Frames dropped from the audio queue so far.
    fn dropped_audio(&self) -> u64;

    /// Graceful shutdown.
    async fn close(&mut self);
}

/// Opens model sessions. Injected so tests can substitute scripted fakes.
#[async_trait]
pub trait ModelConnector: Send + Sync {
    async fn open(
        &self,
        config: SessionConfig,
        previous_handle: Option<String>,
    ) -> Result<Box<dyn ModelTransport>, ModelError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Audio Queue (bounded, drop-oldest)
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded frame queue between the orchestrator and the socket driver.
///
/// Overflow drops the oldest frame and bumps a counter: under sustained
/// overload the model hears the freshest audio and memory stays bounded.
struct AudioQueue {
    inner: Mutex<VecDeque<Bytes>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

impl AudioQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    fn push(&self, frame: Bytes) -> SendAudio {
        let overflowed = {
            let mut queue = self.inner.lock();
            let overflowed = queue.len() >= self.capacity;
            if overflowed {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(frame);
            overflowed
        };
        self.notify.notify_one();
        if overflowed {
            SendAudio::DroppedOldest
        } else {
            SendAudio::Queued
        }
    }

    async fn pop(&self) -> Bytes {
        loop {
            if let Some(frame) = self.inner.lock().pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Commands from the session handle to the driver task.
enum Command {
    /// Pre-serialized client frame.
    Raw(String),
    Close,
}

/// Internal event stream; audio carries the generation it was produced in so
/// frames buffered before an interrupt can be discarded on the way out.
enum InternalEvent {
    Audio { generation: u64, data: Bytes },
    Plain(ModelEvent),
}

/// Production model transport over a Gemini Live WebSocket.
pub struct GeminiSession {
    events: mpsc::Receiver<InternalEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    audio: Arc<AudioQueue>,
    draining: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
}

/// Connector for the production endpoint.
pub struct GeminiConnector {
    endpoint: String,
    api_key: String,
}

impl GeminiConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl ModelConnector for GeminiConnector {
    async fn open(
        &self,
        config: SessionConfig,
        previous_handle: Option<String>,
    ) -> Result<Box<dyn ModelTransport>, ModelError> {
        let ws = connect_and_setup(&self.url(), &config, previous_handle.as_deref()).await?;
        log::info!(
            "[Model] Session open: model={}, voice={}, resumed={}",
            config.model,
            config.voice,
            previous_handle.is_some()
        );

        let (event_tx, event_rx) = mpsc::channel(MODEL_EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let audio = Arc::new(AudioQueue::new(AUDIO_QUEUE_FRAMES));
        let draining = Arc::new(AtomicBool::new(false));
        let generation = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        tokio::spawn(driver_task(DriverState {
            ws,
            url: self.url(),
            config,
            handle: previous_handle,
            events: event_tx,
            commands: cmd_rx,
            audio: Arc::clone(&audio),
            draining: Arc::clone(&draining),
            generation: Arc::clone(&generation),
            cancel: cancel.clone(),
        }));

        Ok(Box::new(GeminiSession {
            events: event_rx,
            cmd_tx,
            audio,
            draining,
            generation,
            cancel,
        }))
    }
}

#[async_trait]
impl ModelTransport for GeminiSession {
    async fn receive(&mut self) -> Option<ModelEvent> {
        // Skip audio from generations that ended in an interrupt: those
        // frames were spoken over by the caller and must never reach the
        // carrier.
        loop {
            match self.events.recv().await? {
                InternalEvent::Audio { generation, data } => {
                    if generation == self.generation.load(Ordering::Acquire) {
                        return Some(ModelEvent::AudioOut(data));
                    }
                }
                InternalEvent::Plain(event) => return Some(event),
            }
        }
    }

    fn send_audio(&self, pcm16k: Bytes) -> SendAudio {
        if self.draining.load(Ordering::Acquire) {
            return SendAudio::Draining;
        }
        self.audio.push(pcm16k)
    }

    fn send_text(&self, text: &str) {
        let _ = self
            .cmd_tx
            .send(Command::Raw(protocol::client_text_message(text)));
    }

    fn send_tool_response(
        &self,
        id: &str,
        name: &str,
        response: &Value,
        scheduling: ToolScheduling,
    ) {
        let _ = self.cmd_tx.send(Command::Raw(protocol::tool_response_message(
            id, name, response, scheduling,
        )));
    }

    fn signal_activity_start(&self) {
        let _ = self
            .cmd_tx
            .send(Command::Raw(protocol::activity_start_message()));
    }

    fn signal_activity_end(&self) {
        let _ = self
            .cmd_tx
            .send(Command::Raw(protocol::activity_end_message()));
    }

    fn signal_audio_stream_end(&self) {
        let _ = self
            .cmd_tx
            .send(Command::Raw(protocol::audio_stream_end_message()));
    }

    fn dropped_audio(&self) -> u64 {
        self.audio.dropped.load(Ordering::Relaxed)
    }

    async fn close(&mut self) {
        let _ = self.cmd_tx.send(Command::Close);
        self.cancel.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Establishment
// ─────────────────────────────────────────────────────────────────────────────

/// Opens a socket, sends the full configuration as the first message, and
/// waits for the server's acknowledgement. No realtime audio may be sent
/// before the ack; the first audio frame after it starts the billable
/// session.
async fn connect_and_setup(
    url: &str,
    config: &SessionConfig,
    handle: Option<&str>,
) -> Result<WsStream, ModelError> {
    let (mut ws, _response) = connect_async(url).await.map_err(classify_connect_error)?;

    let setup = protocol::setup_message(config, handle);
    ws.send(Message::Text(setup.into()))
        .await
        .map_err(|e| ModelError::Transport(format!("setup send failed: {e}")))?;

    let ack_deadline = Duration::from_secs(SETUP_ACK_TIMEOUT_SECS);
    let ack = tokio::time::timeout(ack_deadline, async {
        while let Some(msg) = ws.next().await {
            let msg = msg.map_err(|e| ModelError::Transport(e.to_string()))?;
            let Some(text) = message_text(&msg) else {
                continue;
            };
            let parsed = protocol::parse_server_message(text)
                .map_err(|e| ModelError::Protocol(format!("bad setup response: {e}")))?;
            if parsed.setup_complete.is_some() {
                return Ok(());
            }
        }
        Err(ModelError::Transport("closed during setup".into()))
    })
    .await;

    match ack {
        Ok(Ok(())) => Ok(ws),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ModelError::SetupTimeout),
    }
}

/// Maps a WebSocket handshake failure onto the session error taxonomy.
fn classify_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ModelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => match response.status().as_u16() {
            401 | 403 => ModelError::Auth(format!("HTTP {}", response.status())),
            400 => ModelError::InvalidConfig(format!("HTTP {}", response.status())),
            404 => ModelError::IncompatibleModel(format!("HTTP {}", response.status())),
            _ => ModelError::Transport(format!("HTTP {}", response.status())),
        },
        other => ModelError::Transport(other.to_string()),
    }
}

fn message_text(msg: &Message) -> Option<&str> {
    match msg {
        Message::Text(text) => Some(text.as_ref()),
        _ => None,
    }
}

/// Backoff delay before reconnect attempt `attempt` (1-based).
fn reconnect_delay(attempt: u32) -> Duration {
    let delay = RECONNECT_BASE_DELAY_MS.saturating_mul(1 << (attempt - 1));
    Duration::from_millis(delay.min(RECONNECT_MAX_DELAY_MS))
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver Task
// ─────────────────────────────────────────────────────────────────────────────

struct DriverState {
    ws: WsStream,
    url: String,
    config: SessionConfig,
    /// Most recent resumption handle; consumed on reconnect.
    handle: Option<String>,
    events: mpsc::Sender<InternalEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    audio: Arc<AudioQueue>,
    draining: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
}

/// What to do after a socket ends or a drain point is reached.
enum SocketExit {
    /// Session is over; event already emitted.
    Finished,
    /// Reopen with the latest resumption handle.
    Reopen,
}

async fn driver_task(mut state: DriverState) {
    loop {
        match drive_socket(&mut state).await {
            SocketExit::Finished => break,
            SocketExit::Reopen => {
                let blackout_start = Instant::now();
                match reopen(&mut state).await {
                    Ok(()) => {
                        state.draining.store(false, Ordering::Release);
                        let blackout = blackout_start.elapsed();
                        log::info!(
                            "[Model] Session handover complete: blackout={:?}",
                            blackout
                        );
                        if state
                            .events
                            .send(InternalEvent::Plain(ModelEvent::Reconnected { blackout }))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("[Model] Reconnection exhausted: {}", e);
                        let _ = state
                            .events
                            .send(InternalEvent::Plain(ModelEvent::Error(e)))
                            .await;
                        break;
                    }
                }
            }
        }
    }
}

/// Reconnects with exponential backoff using the latest resumption handle.
async fn reopen(state: &mut DriverState) -> Result<(), ModelError> {
    let mut last_error = ModelError::Transport("no attempts made".into());
    for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
        if attempt > 1 {
            tokio::time::sleep(reconnect_delay(attempt - 1)).await;
        }
        match connect_and_setup(&state.url, &state.config, state.handle.as_deref()).await {
            Ok(ws) => {
                state.ws = ws;
                return Ok(());
            }
            Err(e) if e.is_transient() => {
                log::warn!(
                    "[Model] Reconnect attempt {}/{} failed: {}",
                    attempt,
                    RECONNECT_MAX_ATTEMPTS,
                    e
                );
                last_error = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error)
}

/// Services one socket until it closes or a handover point is reached.
async fn drive_socket(state: &mut DriverState) -> SocketExit {
    // Set when a GoAway arrived; the handover triggers once the current turn
    // finishes or the server's remaining-time budget expires.
    let mut handover_deadline: Option<Instant> = None;

    loop {
        let deadline = handover_deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        tokio::select! {
            biased;

            _ = state.cancel.cancelled() => {
                let _ = state.ws.close(None).await;
                let _ = state
                    .events
                    .send(InternalEvent::Plain(ModelEvent::Closed(CloseReason::Normal)))
                    .await;
                return SocketExit::Finished;
            }

            cmd = state.commands.recv() => {
                match cmd {
                    Some(Command::Raw(text)) => {
                        if state.ws.send(Message::Text(text.into())).await.is_err() {
                            return close_exit(state, "send failed").await;
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = state.ws.close(None).await;
                        let _ = state
                            .events
                            .send(InternalEvent::Plain(ModelEvent::Closed(CloseReason::Normal)))
                            .await;
                        return SocketExit::Finished;
                    }
                }
            }

            frame = state.audio.pop(), if !state.draining.load(Ordering::Acquire) => {
                let text = protocol::realtime_audio_message(&frame);
                if state.ws.send(Message::Text(text.into())).await.is_err() {
                    return close_exit(state, "audio send failed").await;
                }
            }

            _ = tokio::time::sleep_until(deadline), if handover_deadline.is_some() => {
                // Server's time budget ran out before the turn finished.
                log::info!("[Model] GoAway deadline reached, forcing handover");
                let _ = state.ws.close(None).await;
                return SocketExit::Reopen;
            }

            msg = state.ws.next() => {
                match msg {
                    Some(Ok(message)) => {
                        if let Message::Close(_) = message {
                            return close_exit(state, "server close frame").await;
                        }
                        let Some(text) = message_text(&message) else { continue; };
                        match protocol::parse_server_message(text) {
                            Ok(parsed) => {
                                match handle_server_message(state, parsed, &mut handover_deadline).await {
                                    Some(exit) => return exit,
                                    None => {}
                                }
                            }
                            Err(e) => {
                                let head: String = text.chars().take(120).collect();
                                log::warn!("[Model] Unparseable frame: {} in {:?}", e, head);
                                let _ = state
                                    .events
                                    .send(InternalEvent::Plain(ModelEvent::Error(
                                        ModelError::Protocol(format!("unparseable frame: {e}")),
                                    )))
                                    .await;
                                return SocketExit::Finished;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("[Model] Socket error: {}", e);
                        return close_exit(state, &e.to_string()).await;
                    }
                    None => {
                        return close_exit(state, "socket ended").await;
                    }
                }
            }
        }
    }
}

/// Decides what an unsolicited socket end means. Mid-call transport loss is
/// transient: reconnect with the latest handle. Without a handle there is
/// nothing to resume, so the session surfaces the loss and ends.
async fn close_exit(state: &mut DriverState, reason: &str) -> SocketExit {
    if state.handle.is_some() {
        log::info!("[Model] Transient close ({}), attempting resumption", reason);
        return SocketExit::Reopen;
    }
    let _ = state
        .events
        .send(InternalEvent::Plain(ModelEvent::Closed(
            CloseReason::TransportLost(reason.to_string()),
        )))
        .await;
    SocketExit::Finished
}

/// Translates one parsed server frame into session events and state changes.
/// Returns `Some(exit)` when the socket's lifetime ends here.
async fn handle_server_message(
    state: &mut DriverState,
    msg: ServerMessage,
    handover_deadline: &mut Option<Instant>,
) -> Option<SocketExit> {
    if let Some(update) = msg.session_resumption_update {
        if update.resumable && !update.new_handle.is_empty() {
            state.handle = Some(update.new_handle.clone());
        }
        let event = ModelEvent::ResumptionUpdate {
            handle: update.new_handle,
            resumable: update.resumable,
        };
        if state.events.send(InternalEvent::Plain(event)).await.is_err() {
            return Some(SocketExit::Finished);
        }
        return None;
    }

    if let Some(go_away) = msg.go_away {
        let time_left = Duration::from_secs(go_away.time_left_secs());
        log::info!("[Model] GoAway received: time_left={:?}, draining", time_left);
        state.draining.store(true, Ordering::Release);
        *handover_deadline = Some(Instant::now() + time_left);
        let event = ModelEvent::GoAway { time_left };
        if state.events.send(InternalEvent::Plain(event)).await.is_err() {
            return Some(SocketExit::Finished);
        }
        return None;
    }

    if let Some(tool_call) = msg.tool_call {
        for call in tool_call.function_calls {
            if state
                .events
                .send(InternalEvent::Plain(ModelEvent::ToolCall(call)))
                .await
                .is_err()
            {
                return Some(SocketExit::Finished);
            }
        }
        return None;
    }

    let Some(content) = msg.server_content else {
        return None; // setupComplete duplicates, usage metadata, etc.
    };

    if content.interrupted {
        // Invalidate audio of the current generation before surfacing the
        // event: anything still queued belongs to the interrupted turn.
        state.generation.fetch_add(1, Ordering::AcqRel);
        if state
            .events
            .send(InternalEvent::Plain(ModelEvent::Interrupted))
            .await
            .is_err()
        {
            return Some(SocketExit::Finished);
        }
    }

    if let Some(transcription) = content.input_transcription {
        if !transcription.text.is_empty()
            && state
                .events
                .send(InternalEvent::Plain(ModelEvent::InputTranscription(
                    transcription.text,
                )))
                .await
                .is_err()
        {
            return Some(SocketExit::Finished);
        }
    }

    if let Some(transcription) = content.output_transcription {
        if !transcription.text.is_empty()
            && state
                .events
                .send(InternalEvent::Plain(ModelEvent::OutputTranscription(
                    transcription.text,
                )))
                .await
                .is_err()
        {
            return Some(SocketExit::Finished);
        }
    }

    if let Some(turn) = content.model_turn {
        let generation = state.generation.load(Ordering::Acquire);
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                match inline.decode() {
                    Ok(data) => {
                        if state
                            .events
                            .send(InternalEvent::Audio { generation, data })
                            .await
                            .is_err()
                        {
                            return Some(SocketExit::Finished);
                        }
                    }
                    Err(e) => {
                        log::warn!("[Model] Undecodable audio chunk: {}", e);
                    }
                }
            }
        }
    }

    if content.turn_complete {
        if state
            .events
            .send(InternalEvent::Plain(ModelEvent::TurnComplete))
            .await
            .is_err()
        {
            return Some(SocketExit::Finished);
        }
    }

    if content.generation_complete {
        if state
            .events
            .send(InternalEvent::Plain(ModelEvent::GenerationComplete))
            .await
            .is_err()
        {
            return Some(SocketExit::Finished);
        }
        // A pending GoAway hands over at the first quiet point.
        if state.draining.load(Ordering::Acquire) {
            let _ = state.ws.close(None).await;
            return Some(SocketExit::Reopen);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_queue_drops_oldest_on_overflow() {
        let queue = AudioQueue::new(2);
        assert_eq!(queue.push(Bytes::from_static(b"a")), SendAudio::Queued);
        assert_eq!(queue.push(Bytes::from_static(b"b")), SendAudio::Queued);
        assert_eq!(queue.push(Bytes::from_static(b"c")), SendAudio::DroppedOldest);
        assert_eq!(queue.dropped.load(Ordering::Relaxed), 1);

        // Oldest frame is gone; head is "b"
        let head = queue.inner.lock().pop_front().unwrap();
        assert_eq!(head.as_ref(), b"b");
    }

    #[tokio::test]
    async fn audio_queue_pop_wakes_on_push() {
        let queue = Arc::new(AudioQueue::new(4));
        let popper = Arc::clone(&queue);
        let task = tokio::spawn(async move { popper.pop().await });
        tokio::task::yield_now().await;

        queue.push(Bytes::from_static(b"x"));
        let frame = task.await.unwrap();
        assert_eq!(frame.as_ref(), b"x");
    }

    #[test]
    fn reconnect_delays_are_capped_exponential() {
        assert_eq!(reconnect_delay(1), Duration::from_millis(250));
        assert_eq!(reconnect_delay(2), Duration::from_millis(500));
        assert_eq!(reconnect_delay(3), Duration::from_millis(1000));
        assert_eq!(reconnect_delay(5), Duration::from_millis(4000));
        assert_eq!(reconnect_delay(10), Duration::from_millis(4000));
    }

    #[test]
    fn transient_classification() {
        assert!(ModelError::Transport("reset".into()).is_transient());
        assert!(ModelError::SetupTimeout.is_transient());
        assert!(!ModelError::Auth("401".into()).is_transient());
        assert!(!ModelError::InvalidConfig("bad".into()).is_transient());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ModelError::Auth("x".into()).code(), "auth");
        assert_eq!(ModelError::InvalidConfig("x".into()).code(), "invalid_config");
        assert_eq!(ModelError::Protocol("x".into()).code(), "protocol");
    }
}
