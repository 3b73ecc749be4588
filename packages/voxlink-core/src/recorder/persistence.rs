//! Persistence boundary: durable call records and event streams.
//!
//! The store itself is opaque. The gateway needs exactly two write shapes:
//! upsert-by-id for consolidated call records and append-with-idempotency-key
//! for per-call event streams. The HTTP implementation treats duplicate-key
//! conflicts as success, which is what makes at-least-once delivery safe.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::call::{CallEvent, CallStatus};

/// Errors from the persistence store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store returned {0}: {1}")]
    Status(u16, String),
}

impl PersistenceError {
    /// True when a retry may succeed (timeouts, connection loss, 5xx, 429).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status(code, _) => *code >= 500 || *code == 429,
        }
    }
}

/// Consolidated call record, upserted by id.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecordRow {
    pub id: Uuid,
    pub stream_id: Option<String>,
    pub direction: &'static str,
    pub from_number: String,
    pub to_number: String,
    pub agent_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: CallStatus,
    pub duration_secs: Option<i64>,
    pub outcome: Option<String>,
    pub recording_url: Option<String>,
    pub transcript: String,
    pub sentiment: Option<f32>,
    pub resumption_handle_count: u32,
}

/// One appended event, keyed by (call_id, seq) for idempotency.
#[derive(Debug, Clone, Serialize)]
pub struct CallEventRow {
    pub call_id: Uuid,
    /// Monotonic per-call counter; the idempotency key together with call_id.
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: CallEvent,
}

/// Write-only persistence interface.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Writes or replaces the consolidated record for a call.
    async fn upsert_call(&self, record: &CallRecordRow) -> Result<(), PersistenceError>;

    /// Appends one event. Appending the same (call_id, seq) twice must
    /// produce exactly one stored record.
    async fn append_event(&self, row: &CallEventRow) -> Result<(), PersistenceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Store
// ─────────────────────────────────────────────────────────────────────────────

/// Persistence over a REST store (calls table + call_events stream).
pub struct HttpPersistence {
    http: Client,
    base_url: String,
    api_key: String,
}

impl HttpPersistence {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        merge: bool,
    ) -> Result<(), PersistenceError> {
        let mut request = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .header("apikey", &self.api_key)
            .json(body);
        if merge {
            request = request.header("Prefer", "resolution=merge-duplicates");
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        // Duplicate key on an append: the row is already there, which is
        // exactly what at-least-once delivery wants.
        if status.as_u16() == 409 {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(PersistenceError::Status(status.as_u16(), body))
    }
}

#[async_trait]
impl Persistence for HttpPersistence {
    async fn upsert_call(&self, record: &CallRecordRow) -> Result<(), PersistenceError> {
        self.post("calls", record, true).await
    }

    async fn append_event(&self, row: &CallEventRow) -> Result<(), PersistenceError> {
        self.post("call_events", row, false).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-Memory Store (tests)
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory store used by the test suites.
///
/// Mirrors the HTTP store's idempotency semantics and can inject transient
/// failures to exercise the recorder's retry path.
#[derive(Default)]
pub struct MemoryPersistence {
    records: Mutex<std::collections::HashMap<Uuid, CallRecordRow>>,
    events: Mutex<Vec<CallEventRow>>,
    seen_keys: Mutex<HashSet<(Uuid, u64)>>,
    /// Remaining writes that will fail with a transient error.
    fail_next: Mutex<u32>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` writes fail with a transient error.
    pub fn fail_next_writes(&self, n: u32) {
        *self.fail_next.lock() = n;
    }

    pub fn record(&self, call_id: Uuid) -> Option<CallRecordRow> {
        self.records.lock().get(&call_id).cloned()
    }

    pub fn events_for(&self, call_id: Uuid) -> Vec<CallEventRow> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.call_id == call_id)
            .cloned()
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    fn maybe_fail(&self) -> Result<(), PersistenceError> {
        let mut remaining = self.fail_next.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(PersistenceError::Status(503, "injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn upsert_call(&self, record: &CallRecordRow) -> Result<(), PersistenceError> {
        self.maybe_fail()?;
        self.records.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn append_event(&self, row: &CallEventRow) -> Result<(), PersistenceError> {
        self.maybe_fail()?;
        // Idempotency: a key seen before stores nothing new
        if self.seen_keys.lock().insert((row.call_id, row.seq)) {
            self.events.lock().push(row.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallDirection;

    fn event_row(call_id: Uuid, seq: u64) -> CallEventRow {
        CallEventRow {
            call_id,
            seq,
            at: Utc::now(),
            event: CallEvent::Created {
                direction: CallDirection::Inbound,
                from: "+1".into(),
                to: "+2".into(),
            },
        }
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_stores_once() {
        let store = MemoryPersistence::new();
        let call_id = Uuid::new_v4();

        store.append_event(&event_row(call_id, 1)).await.unwrap();
        store.append_event(&event_row(call_id, 1)).await.unwrap();
        store.append_event(&event_row(call_id, 2)).await.unwrap();

        assert_eq!(store.events_for(call_id).len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let store = MemoryPersistence::new();
        store.fail_next_writes(1);

        let err = store
            .append_event(&event_row(Uuid::new_v4(), 1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn status_transience_classification() {
        assert!(PersistenceError::Status(503, String::new()).is_transient());
        assert!(PersistenceError::Status(429, String::new()).is_transient());
        assert!(!PersistenceError::Status(400, String::new()).is_transient());
        assert!(!PersistenceError::Status(401, String::new()).is_transient());
    }

    #[test]
    fn event_row_serializes_flat() {
        let row = event_row(Uuid::new_v4(), 7);
        let v = serde_json::to_value(&row).unwrap();
        assert_eq!(v["seq"], 7);
        assert_eq!(v["type"], "created");
        assert_eq!(v["direction"], "inbound");
    }
}
