//! Carrier WebSocket session: ordered inbound events, paced outbound media.
//!
//! One session per accepted carrier connection. A reader task parses inbound
//! frames into ordered [`CarrierEvent`]s; a writer task owns the sink and
//! emits one 20 ms frame per 20 ms of wall time from a bounded drop-oldest
//! queue. Clear requests bypass the queue so barge-in takes effect within a
//! single tick.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::StreamExt;
use futures::{Sink, SinkExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::protocol::{self, InboundFrame, OutboundFrame, StartInfo};
use super::{CarrierEvent, CarrierTransport};
use crate::audio::SequencedFrame;
use crate::protocol_constants::{
    AUDIO_QUEUE_FRAMES, CARRIER_EVENT_CHANNEL_CAPACITY, FRAME_DURATION_MS, ULAW_FRAME_BYTES,
};

/// Items in the paced outbound queue. Marks travel through the same queue so
/// they trail all media queued before them.
enum QueueItem {
    Media(Bytes),
    Mark(String),
}

/// Priority commands that bypass the paced queue.
enum WriterCommand {
    /// Flush the queue and send a clear frame.
    Clear,
    /// Close the socket with the given reason.
    Close(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Per-session counters, logged once when the session drops.
pub struct CarrierStats {
    stream_label: Mutex<String>,
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub inbound_frames: AtomicU64,
    pub inbound_gap_frames: AtomicU64,
    pub marks_sent: AtomicU64,
    pub clears_sent: AtomicU64,
}

impl CarrierStats {
    fn new() -> Self {
        Self {
            stream_label: Mutex::new(String::from("(pre-start)")),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            inbound_frames: AtomicU64::new(0),
            inbound_gap_frames: AtomicU64::new(0),
            marks_sent: AtomicU64::new(0),
            clears_sent: AtomicU64::new(0),
        }
    }

    fn set_label(&self, stream_id: &str) {
        *self.stream_label.lock() = stream_id.to_string();
    }
}

impl Drop for CarrierStats {
    fn drop(&mut self) {
        log::info!(
            "[Carrier] Session ended: stream={}, frames_in={}, gap_frames={}, frames_out={}, \
             dropped_out={}, marks={}, clears={}",
            self.stream_label.lock(),
            self.inbound_frames.load(Ordering::Relaxed),
            self.inbound_gap_frames.load(Ordering::Relaxed),
            self.frames_sent.load(Ordering::Relaxed),
            self.frames_dropped.load(Ordering::Relaxed),
            self.marks_sent.load(Ordering::Relaxed),
            self.clears_sent.load(Ordering::Relaxed),
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Writer State
// ─────────────────────────────────────────────────────────────────────────────

struct OutboundState {
    /// Paced queue, bounded to `queue_frames` media items.
    queue: Mutex<VecDeque<QueueItem>>,
    /// Sub-frame residue awaiting enough bytes for a full 20 ms frame.
    chunk_residue: Mutex<Vec<u8>>,
    queue_frames: usize,
}

impl OutboundState {
    fn new(queue_frames: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(queue_frames)),
            chunk_residue: Mutex::new(Vec::with_capacity(ULAW_FRAME_BYTES)),
            queue_frames,
        }
    }

    /// Pushes a frame, dropping the oldest queued media item on overflow.
    /// Marks are never dropped — they are delivery receipts, not audio.
    fn push_media(&self, frame: Bytes, stats: &CarrierStats) {
        let mut queue = self.queue.lock();
        let media_count = queue
            .iter()
            .filter(|i| matches!(i, QueueItem::Media(_)))
            .count();
        if media_count >= self.queue_frames {
            if let Some(idx) = queue.iter().position(|i| matches!(i, QueueItem::Media(_))) {
                queue.remove(idx);
                stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        queue.push_back(QueueItem::Media(frame));
    }

    fn push_mark(&self, name: String) {
        self.queue.lock().push_back(QueueItem::Mark(name));
    }

    fn clear(&self) {
        self.queue.lock().clear();
        self.chunk_residue.lock().clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Carrier Session
// ─────────────────────────────────────────────────────────────────────────────

/// Production carrier transport over an accepted WebSocket.
pub struct CarrierSession {
    events: mpsc::Receiver<CarrierEvent>,
    outbound: Arc<OutboundState>,
    cmd_tx: mpsc::UnboundedSender<WriterCommand>,
    stats: Arc<CarrierStats>,
    cancel: CancellationToken,
}

impl CarrierSession {
    /// Wraps an accepted socket, spawning the reader and paced writer tasks.
    ///
    /// The tasks exit when the socket closes or `cancel` fires; both paths
    /// drain within the call's cancellation grace period.
    pub fn spawn(socket: WebSocket, cancel: CancellationToken) -> Self {
        let (sink, stream) = socket.split();
        let (event_tx, event_rx) = mpsc::channel(CARRIER_EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let stats = Arc::new(CarrierStats::new());
        let outbound = Arc::new(OutboundState::new(AUDIO_QUEUE_FRAMES));
        // The writer needs the stream id from the start frame before it can
        // address outbound frames; the reader publishes it here.
        let (sid_tx, sid_rx) = tokio::sync::watch::channel(String::new());

        tokio::spawn(reader_task(
            stream,
            event_tx,
            sid_tx,
            Arc::clone(&stats),
            cancel.clone(),
        ));
        tokio::spawn(writer_task(
            sink,
            Arc::clone(&outbound),
            cmd_rx,
            sid_rx,
            Arc::clone(&stats),
            cancel.clone(),
        ));

        Self {
            events: event_rx,
            outbound,
            cmd_tx,
            stats,
            cancel,
        }
    }
}

#[async_trait]
impl CarrierTransport for CarrierSession {
    async fn receive(&mut self) -> Option<CarrierEvent> {
        self.events.recv().await
    }

    fn send_media(&self, ulaw: Bytes) {
        // Chunk into exact 20 ms frames; the remainder waits for more audio.
        let mut residue = self.outbound.chunk_residue.lock();
        residue.extend_from_slice(&ulaw);
        while residue.len() >= ULAW_FRAME_BYTES {
            let frame: Vec<u8> = residue.drain(..ULAW_FRAME_BYTES).collect();
            self.outbound.push_media(Bytes::from(frame), &self.stats);
        }
    }

    fn send_mark(&self, name: &str) {
        self.outbound.push_mark(name.to_string());
    }

    fn send_clear(&self) {
        self.outbound.clear();
        let _ = self.cmd_tx.send(WriterCommand::Clear);
    }

    fn outbound_depth(&self) -> usize {
        self.outbound.queue.lock().len()
    }

    fn dropped_outbound(&self) -> u64 {
        self.stats.frames_dropped.load(Ordering::Relaxed)
    }

    fn dropped_inbound(&self) -> u64 {
        self.stats.inbound_gap_frames.load(Ordering::Relaxed)
    }

    async fn close(&mut self, reason: &str) {
        let _ = self.cmd_tx.send(WriterCommand::Close(reason.to_string()));
        self.cancel.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader Task
// ─────────────────────────────────────────────────────────────────────────────

async fn reader_task<S>(
    mut stream: S,
    events: mpsc::Sender<CarrierEvent>,
    sid_tx: tokio::sync::watch::Sender<String>,
    stats: Arc<CarrierStats>,
    cancel: CancellationToken,
) where
    S: futures::Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    // Carrier chunk numbers are contiguous per stream; a jump means frames
    // were lost upstream. Counted, never reordered.
    let mut expected_chunk: Option<u64> = None;
    let mut seq: u64 = 0;

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = stream.next() => msg,
        };

        let Some(Ok(message)) = message else {
            let _ = events.send(CarrierEvent::Closed).await;
            break;
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                let _ = events.send(CarrierEvent::Closed).await;
                break;
            }
            // The carrier protocol is text-only; pings are handled by axum.
            _ => continue,
        };

        let event = match protocol::parse_frame(&text) {
            Ok(InboundFrame::Connected { .. }) => CarrierEvent::Connected,
            Ok(InboundFrame::Start { stream_sid, start }) => {
                match StartInfo::from_start(stream_sid, start) {
                    Ok(info) => {
                        stats.set_label(&info.stream_id);
                        let _ = sid_tx.send(info.stream_id.clone());
                        CarrierEvent::Start(info)
                    }
                    Err(e) => CarrierEvent::ProtocolError(e.to_string()),
                }
            }
            Ok(InboundFrame::Media { media }) => {
                let chunk = media.chunk.as_deref().and_then(|c| c.parse::<u64>().ok());
                match protocol::decode_media_payload(&media) {
                    Ok(payload) if payload.len() == ULAW_FRAME_BYTES => {
                        stats.inbound_frames.fetch_add(1, Ordering::Relaxed);
                        if let (Some(chunk), Some(expected)) = (chunk, expected_chunk) {
                            if chunk > expected {
                                stats
                                    .inbound_gap_frames
                                    .fetch_add(chunk - expected, Ordering::Relaxed);
                            }
                        }
                        if let Some(chunk) = chunk {
                            expected_chunk = Some(chunk + 1);
                        }
                        seq += 1;
                        CarrierEvent::Media(SequencedFrame { seq, data: payload })
                    }
                    Ok(payload) => CarrierEvent::ProtocolError(format!(
                        "media frame of {} bytes, expected {}",
                        payload.len(),
                        ULAW_FRAME_BYTES
                    )),
                    Err(e) => CarrierEvent::ProtocolError(e.to_string()),
                }
            }
            Ok(InboundFrame::Mark { mark }) => CarrierEvent::MarkEchoed { name: mark.name },
            Ok(InboundFrame::Dtmf { dtmf }) => CarrierEvent::Dtmf { digit: dtmf.digit },
            Ok(InboundFrame::Stop { stop }) => CarrierEvent::Stop {
                reason: stop
                    .and_then(|s| s.call_sid)
                    .map_or_else(|| "carrier_stop".to_string(), |sid| format!("stop:{sid}")),
            },
            Err(e) => {
                log::warn!("[Carrier] Protocol error: {}", e);
                CarrierEvent::ProtocolError(e.to_string())
            }
        };

        let fatal = matches!(event, CarrierEvent::ProtocolError(_));
        if events.send(event).await.is_err() {
            break; // orchestrator gone
        }
        if fatal {
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paced Writer Task
// ─────────────────────────────────────────────────────────────────────────────

/// Emits one queued 20 ms frame per 20 ms of wall time.
///
/// Marks queued between media frames are flushed in the same tick as the
/// media frame they follow, preserving queue order without consuming pacing
/// slots. When the queue is empty nothing is sent — the carrier does not
/// require continuous outbound audio.
async fn writer_task<S>(
    mut sink: S,
    outbound: Arc<OutboundState>,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    sid_rx: tokio::sync::watch::Receiver<String>,
    stats: Arc<CarrierStats>,
    cancel: CancellationToken,
) where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
{
    let mut metronome = interval(Duration::from_millis(u64::from(FRAME_DURATION_MS)));
    metronome.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            cmd = commands.recv() => {
                match cmd {
                    Some(WriterCommand::Clear) => {
                        // Queue was already flushed by the caller; tell the
                        // carrier to discard what it has buffered too.
                        let sid = sid_rx.borrow().clone();
                        if sid.is_empty() {
                            continue;
                        }
                        let frame = OutboundFrame::clear(&sid).to_text();
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                        stats.clears_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(WriterCommand::Close(reason)) => {
                        log::debug!("[Carrier] Closing outbound: {}", reason);
                        let _ = sink.close().await;
                        break;
                    }
                    None => break,
                }
            }

            _ = metronome.tick() => {
                let sid = sid_rx.borrow().clone();
                if sid.is_empty() {
                    continue; // no stream yet, nothing can be addressed
                }

                // Send trailing marks and exactly one media frame this tick.
                loop {
                    let item = outbound.queue.lock().pop_front();
                    match item {
                        Some(QueueItem::Mark(name)) => {
                            let frame = OutboundFrame::mark(&sid, &name).to_text();
                            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                                log::debug!("[Carrier] Send failed: {}", e);
                                return;
                            }
                            stats.marks_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Some(QueueItem::Media(bytes)) => {
                            let frame = OutboundFrame::media(&sid, &bytes).to_text();
                            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                                log::debug!("[Carrier] Send failed: {}", e);
                                return;
                            }
                            stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use tokio::time::{self, Duration};

    struct WriterHarness {
        outbound: Arc<OutboundState>,
        stats: Arc<CarrierStats>,
        cmd: mpsc::UnboundedSender<WriterCommand>,
        sink_rx: fmpsc::UnboundedReceiver<Message>,
        cancel: CancellationToken,
        _sid_tx: tokio::sync::watch::Sender<String>,
    }

    fn test_writer(queue_frames: usize) -> WriterHarness {
        let outbound = Arc::new(OutboundState::new(queue_frames));
        let stats = Arc::new(CarrierStats::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sink_tx, sink_rx) = fmpsc::unbounded::<Message>();
        let (sid_tx, sid_rx) = tokio::sync::watch::channel(String::from("MZ1"));
        let cancel = CancellationToken::new();

        tokio::spawn(writer_task(
            sink_tx,
            Arc::clone(&outbound),
            cmd_rx,
            sid_rx,
            Arc::clone(&stats),
            cancel.clone(),
        ));

        WriterHarness {
            outbound,
            stats,
            cmd: cmd_tx,
            sink_rx,
            cancel,
            _sid_tx: sid_tx,
        }
    }

    fn frame_of(byte: u8) -> Bytes {
        Bytes::from(vec![byte; ULAW_FRAME_BYTES])
    }

    fn event_of(msg: &Message) -> String {
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        v["event"].as_str().unwrap().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn writer_paces_one_frame_per_tick() {
        let mut h = test_writer(10);

        for i in 0..3u8 {
            h.outbound.push_media(frame_of(i), &h.stats);
        }

        // First tick fires immediately; three ticks drain three frames
        time::advance(Duration::from_millis(1)).await;
        time::advance(Duration::from_millis(20)).await;
        time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;

        let mut sent = 0;
        while let Ok(Some(msg)) = h.sink_rx.try_next() {
            assert_eq!(event_of(&msg), "media");
            sent += 1;
        }
        assert_eq!(sent, 3, "three ticks should emit exactly three frames");

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn writer_does_not_burst_queue() {
        let mut h = test_writer(10);

        for i in 0..5u8 {
            h.outbound.push_media(frame_of(i), &h.stats);
        }

        // Only one tick elapses: only one frame may leave
        time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        let mut sent = 0;
        while let Ok(Some(_)) = h.sink_rx.try_next() {
            sent += 1;
        }
        assert_eq!(sent, 1, "a single tick must emit a single frame");

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn marks_trail_queued_media_without_consuming_ticks() {
        let mut h = test_writer(10);

        h.outbound.push_media(frame_of(1), &h.stats);
        h.outbound.push_mark("turn-1".to_string());
        h.outbound.push_media(frame_of(2), &h.stats);

        // One tick: first media goes out; mark does NOT (it is queued after
        // media 1 but flushing it would require popping past it)
        time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        let first = h.sink_rx.try_next().unwrap().unwrap();
        assert_eq!(event_of(&first), "media");

        // Second tick: mark flushes, then media 2 in the same tick
        time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;

        let second = h.sink_rx.try_next().unwrap().unwrap();
        assert_eq!(event_of(&second), "mark");
        let third = h.sink_rx.try_next().unwrap().unwrap();
        assert_eq!(event_of(&third), "media");

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_drops_oldest_media() {
        let h = test_writer(2);

        h.outbound.push_media(frame_of(1), &h.stats);
        h.outbound.push_media(frame_of(2), &h.stats);
        h.outbound.push_media(frame_of(3), &h.stats);

        assert_eq!(h.stats.frames_dropped.load(Ordering::Relaxed), 1);
        // Oldest (frame 1) was dropped; head of queue is frame 2
        let queue = h.outbound.queue.lock();
        let QueueItem::Media(head) = &queue[0] else {
            panic!("expected media at head");
        };
        assert_eq!(head[0], 2);
        drop(queue);

        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn clear_flushes_queue_and_sends_clear_frame() {
        let mut h = test_writer(10);

        h.outbound.push_media(frame_of(1), &h.stats);
        h.outbound.push_media(frame_of(2), &h.stats);

        // Barge-in: flush locally, then command the writer
        h.outbound.clear();
        h.cmd.send(WriterCommand::Clear).unwrap();
        tokio::task::yield_now().await;

        let msg = h.sink_rx.try_next().unwrap().unwrap();
        assert_eq!(event_of(&msg), "clear");

        // Subsequent ticks have nothing to send
        time::advance(Duration::from_millis(40)).await;
        tokio::task::yield_now().await;
        assert!(h.sink_rx.try_next().is_err(), "no frames after clear");

        h.cancel.cancel();
    }
}
