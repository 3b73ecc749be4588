//! Lifecycle recorder: in-memory call events to durable records.
//!
//! One writer task per call keeps that call's writes strictly ordered while
//! different calls persist fully in parallel. Delivery is at-least-once with
//! (call_id, counter) idempotency keys; transient store errors retry with
//! exponential backoff inside a per-call budget, after which the call
//! degrades to record-only-partial — a visible warning, never a dropped
//! call.

pub mod persistence;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::call::{Call, CallEvent};
use crate::protocol_constants::RECORD_RETRY_BUDGET_SECS;
pub use persistence::{
    CallEventRow, CallRecordRow, HttpPersistence, MemoryPersistence, Persistence, PersistenceError,
};

/// Backoff schedule for transient store errors (ms). The last delay repeats
/// until the per-call budget runs out.
const RETRY_DELAYS_MS: [u64; 5] = [250, 500, 1000, 2000, 4000];

enum RecorderMsg {
    Event(CallEventRow),
    Finalize(CallRecordRow),
}

struct CallWriter {
    tx: mpsc::UnboundedSender<RecorderMsg>,
    next_seq: AtomicU64,
    finalized: AtomicBool,
    task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Buffers per-call events and flushes them to the persistence boundary.
pub struct CallRecorder {
    persistence: Arc<dyn Persistence>,
    calls: DashMap<Uuid, Arc<CallWriter>>,
}

impl CallRecorder {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            calls: DashMap::new(),
        }
    }

    /// Registers a call and spawns its writer task.
    pub fn begin(&self, call_id: Uuid) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(writer_task(call_id, Arc::clone(&self.persistence), rx));
        let writer = Arc::new(CallWriter {
            tx,
            next_seq: AtomicU64::new(1),
            finalized: AtomicBool::new(false),
            task: parking_lot::Mutex::new(Some(task)),
        });
        self.calls.insert(call_id, writer);
    }

    /// Appends one event to the call's durable stream. Non-blocking; the
    /// writer task owns ordering and retries.
    pub fn append_event(&self, call_id: Uuid, event: CallEvent) {
        let Some(writer) = self.calls.get(&call_id).map(|w| Arc::clone(&w)) else {
            log::warn!("[Recorder] Event for unknown call {}", call_id);
            return;
        };
        if writer.finalized.load(Ordering::Acquire) {
            // Terminal calls are read-only; no further events
            log::warn!("[Recorder] Dropping event after finalize for {}", call_id);
            return;
        }
        let seq = writer.next_seq.fetch_add(1, Ordering::Relaxed);
        let row = CallEventRow {
            call_id,
            seq,
            at: Utc::now(),
            event,
        };
        let _ = writer.tx.send(RecorderMsg::Event(row));
    }

    /// Writes the single consolidated terminal record. Idempotent: only the
    /// first call per id does anything.
    pub fn finalize(&self, call: &Call) {
        let Some(writer) = self.calls.get(&call.id).map(|w| Arc::clone(&w)) else {
            log::warn!("[Recorder] Finalize for unknown call {}", call.id);
            return;
        };
        if writer
            .finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let row = CallRecordRow {
            id: call.id,
            stream_id: call.stream_id.clone(),
            direction: call.direction.as_str(),
            from_number: call.from.clone(),
            to_number: call.to.clone(),
            agent_id: call.agent_id.clone(),
            started_at: call.started_at,
            ended_at: call.ended_at,
            status: call.status,
            duration_secs: call.duration_secs(),
            outcome: call.outcome.clone(),
            recording_url: call.recording_url.clone(),
            transcript: call.aggregated_transcript(),
            sentiment: call.sentiment,
            resumption_handle_count: call.resumption_handle_count,
        };
        let _ = writer.tx.send(RecorderMsg::Finalize(row));
    }

    /// Waits for a call's writer to flush everything, then forgets the call.
    /// Used at shutdown and by tests.
    pub async fn drain(&self, call_id: Uuid) {
        let Some((_, writer)) = self.calls.remove(&call_id) else {
            return;
        };
        let task = writer.task.lock().take();
        // Dropping the last writer handle closes the channel, letting the
        // task finish its queue and exit even without a finalize.
        drop(writer);
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Per-call writer: strictly ordered, at-least-once, budgeted retries.
async fn writer_task(
    call_id: Uuid,
    persistence: Arc<dyn Persistence>,
    mut rx: mpsc::UnboundedReceiver<RecorderMsg>,
) {
    // Cumulative backoff spent for this call. Once exhausted, the call is
    // degraded: writes get one attempt each and failures are only counted.
    let mut budget = Duration::from_secs(RECORD_RETRY_BUDGET_SECS);
    let mut degraded = false;
    let mut lost_writes: u64 = 0;

    while let Some(msg) = rx.recv().await {
        let is_finalize = matches!(msg, RecorderMsg::Finalize(_));
        let result = persist_with_retry(
            &*persistence,
            &msg,
            &mut budget,
            &mut degraded,
            call_id,
        )
        .await;
        if result.is_err() {
            lost_writes += 1;
        }
        if is_finalize {
            break;
        }
    }

    if lost_writes > 0 {
        log::warn!(
            "[Recorder] Call {} persisted partially: {} write(s) lost",
            call_id,
            lost_writes
        );
    }
}

async fn persist_with_retry(
    persistence: &dyn Persistence,
    msg: &RecorderMsg,
    budget: &mut Duration,
    degraded: &mut bool,
    call_id: Uuid,
) -> Result<(), PersistenceError> {
    let mut attempt = 0usize;
    loop {
        let result = match msg {
            RecorderMsg::Event(row) => persistence.append_event(row).await,
            RecorderMsg::Finalize(row) => persistence.upsert_call(row).await,
        };

        let err = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if !err.is_transient() || *degraded {
            log::warn!("[Recorder] Write failed for {}: {}", call_id, err);
            return Err(err);
        }

        let delay_ms = RETRY_DELAYS_MS[attempt.min(RETRY_DELAYS_MS.len() - 1)];
        let delay = Duration::from_millis(delay_ms);
        if delay > *budget {
            *degraded = true;
            log::warn!(
                "[Recorder] Retry budget exhausted for {}; downgrading to record-only partial",
                call_id
            );
            return Err(err);
        }
        *budget -= delay;
        attempt += 1;
        log::debug!(
            "[Recorder] Transient store error for {} (attempt {}), retrying in {}ms: {}",
            call_id,
            attempt,
            delay_ms,
            err
        );
        tokio::time::sleep(delay).await;
    }
}
