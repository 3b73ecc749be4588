//! Call records and the call state machine.
//!
//! Status moves monotonically: Pending → Ringing → InProgress → one of the
//! terminal states. The record is owned exclusively by the orchestrator
//! until it turns terminal, then handed to the recorder for its final flush
//! and never mutated again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::model::ToolScheduling;

/// Direction of a call relative to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Call lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Ringing,
    InProgress,
    Completed,
    Failed,
    Abandoned,
}

impl CallStatus {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Abandoned)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ringing => "ringing",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// True when the state machine admits `next` from this status.
    #[must_use]
    pub fn can_transition(&self, next: CallStatus) -> bool {
        use CallStatus::{Abandoned, Completed, Failed, InProgress, Pending, Ringing};
        matches!(
            (self, next),
            (Pending, Ringing)
                | (Pending, Failed)
                | (Ringing, InProgress)
                | (Ringing, Failed)
                | (Ringing, Abandoned)
                // Forwarded calls complete at resolve time, before media
                | (Ringing, Completed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Abandoned)
        )
    }
}

/// Illegal state-machine transition.
#[derive(Debug, Error)]
#[error("Illegal call transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: CallStatus,
    pub to: CallStatus,
}

/// Who spoke a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
}

/// One transcript fragment, ordered by timestamp within a call.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptFragment {
    pub source: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// One tool invocation reflected from the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub response: Value,
    pub scheduling: ToolScheduling,
}

/// The unit of work: one telephone call through the gateway.
#[derive(Debug)]
pub struct Call {
    pub id: Uuid,
    /// Carrier stream identifier, assigned once media begins.
    pub stream_id: Option<String>,
    /// Carrier-side call identifier.
    pub carrier_call_id: Option<String>,
    pub direction: CallDirection,
    /// Remote party number.
    pub from: String,
    /// Local party number.
    pub to: String,
    pub agent_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: CallStatus,
    /// Terminal outcome tag, e.g. "completed", "auth", "emergency_stop".
    pub outcome: Option<String>,
    pub recording_url: Option<String>,
    pub sentiment: Option<f32>,
    transcript: Vec<TranscriptFragment>,
    /// Model session handovers performed during the call.
    pub resumption_handle_count: u32,
}

impl Call {
    /// Creates a pending call. `from`/`to` are filled in once the carrier's
    /// start frame resolves the call identity.
    pub fn new(direction: CallDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream_id: None,
            carrier_call_id: None,
            direction,
            from: String::new(),
            to: String::new(),
            agent_id: None,
            started_at: Utc::now(),
            ended_at: None,
            status: CallStatus::Pending,
            outcome: None,
            recording_url: None,
            sentiment: None,
            transcript: Vec::new(),
            resumption_handle_count: 0,
        }
    }

    /// Applies a status transition, enforcing monotonicity. Terminal records
    /// are read-only: any transition out of a terminal state is rejected.
    pub fn transition(&mut self, next: CallStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        log::debug!(
            "[Call] {} status {} -> {}",
            self.id,
            self.status.as_str(),
            next.as_str()
        );
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Appends a transcript fragment, preserving arrival order.
    pub fn push_transcript(&mut self, source: Speaker, text: String) -> TranscriptFragment {
        let fragment = TranscriptFragment {
            source,
            text,
            at: Utc::now(),
        };
        self.transcript.push(fragment.clone());
        fragment
    }

    /// Transcript fragments in order.
    pub fn transcript(&self) -> &[TranscriptFragment] {
        &self.transcript
    }

    /// Concatenation of all fragments in timestamp order.
    pub fn aggregated_transcript(&self) -> String {
        let mut out = String::new();
        for fragment in &self.transcript {
            if !out.is_empty() {
                out.push('\n');
            }
            let speaker = match fragment.source {
                Speaker::Caller => "caller",
                Speaker::Agent => "agent",
            };
            out.push_str(speaker);
            out.push_str(": ");
            out.push_str(&fragment.text);
        }
        out
    }

    /// Whole-second call duration. Defined only once terminal.
    pub fn duration_secs(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_seconds().max(0))
    }
}

/// Lifecycle events emitted to the recorder while a call runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    Created {
        direction: CallDirection,
        from: String,
        to: String,
    },
    StatusChanged {
        status: CallStatus,
    },
    AgentResolved {
        agent_id: String,
    },
    Transcript(TranscriptFragment),
    ToolCall(ToolCallRecord),
    Dtmf {
        digit: String,
    },
    /// A model session handover completed invisibly.
    Handover {
        blackout_ms: u64,
    },
    TurnDelivered {
        mark: String,
    },
}
