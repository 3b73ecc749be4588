//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (G.711 telephony,
//! the carrier media-stream protocol, the model's realtime API) and changing
//! them would break protocol compliance.

// ─────────────────────────────────────────────────────────────────────────────
// Telephony Audio (carrier side)
// ─────────────────────────────────────────────────────────────────────────────

/// Carrier media sample rate (Hz). G.711 telephony is always 8 kHz.
pub const CARRIER_SAMPLE_RATE: u32 = 8000;

/// Duration of one carrier media frame (ms).
///
/// The carrier emits and expects 20 ms μ-law frames; outbound media must be
/// paced at this cadence.
pub const FRAME_DURATION_MS: u32 = 20;

/// Bytes in one 20 ms μ-law frame at 8 kHz (one byte per sample).
pub const ULAW_FRAME_BYTES: usize = (CARRIER_SAMPLE_RATE as usize / 1000) * FRAME_DURATION_MS as usize;

/// μ-law code for a zero-amplitude sample. Silence frames are filled with
/// this value, not 0x00 (which decodes to near full negative scale).
pub const ULAW_SILENCE_BYTE: u8 = 0xFF;

// ─────────────────────────────────────────────────────────────────────────────
// Model Audio
// ─────────────────────────────────────────────────────────────────────────────

/// Sample rate of PCM sent to the model (Hz).
pub const MODEL_INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of PCM received from the model (Hz).
pub const MODEL_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// MIME type for realtime audio chunks sent to the model.
pub const MODEL_INPUT_MIME: &str = "audio/pcm;rate=16000";

/// Default model realtime endpoint (bidirectional generate-content WebSocket).
pub const MODEL_WS_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Model names the gateway will open sessions against.
///
/// Agent configurations are validated against this set before a session is
/// opened; an unknown model fails the call at setup, not mid-call.
pub const ALLOWED_MODELS: &[&str] = &[
    "gemini-live-2.5-flash-preview",
    "gemini-2.0-flash-live-001",
    "gemini-2.5-flash-preview-native-audio-dialog",
];

/// Prebuilt voice names accepted by the model.
pub const ALLOWED_VOICES: &[&str] = &[
    "Puck", "Charon", "Kore", "Fenrir", "Aoede", "Leda", "Orus", "Zephyr",
];

// ─────────────────────────────────────────────────────────────────────────────
// Queues and Pacing
// ─────────────────────────────────────────────────────────────────────────────

/// Bound for the caller→model and model→caller audio queues (frames).
///
/// 200 frames at 20 ms ≈ 4 s of audio. Overflow drops the oldest frame and
/// increments a counter; it never blocks the producer.
pub const AUDIO_QUEUE_FRAMES: usize = 200;

/// Budget for draining the model→caller path after an interrupt (ms).
pub const INTERRUPT_DRAIN_BUDGET_MS: u64 = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Session Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum time from carrier connect to a fully established call (seconds).
///
/// Covers carrier Start, routing, and the model's setup acknowledgement.
pub const SETUP_TIMEOUT_SECS: u64 = 8;

/// Time to wait for the model's setup acknowledgement on each connect (seconds).
pub const SETUP_ACK_TIMEOUT_SECS: u64 = 5;

/// Inbound silence before the caller is prompted once (seconds). A second
/// idle period of the same length ends the call as abandoned.
pub const IDLE_TIMEOUT_SECS: u64 = 30;

/// Grace period for unblocking all call flows after cancellation (ms).
pub const CANCEL_GRACE_MS: u64 = 250;

/// Maximum carrier-observable blackout during a model session handover (ms).
///
/// A handover that exceeds this is no longer invisible to the caller and the
/// orchestrator ends the call instead of pretending it recovered.
pub const HANDOVER_BLACKOUT_BUDGET_MS: u64 = 400;

/// Time budget for closing the carrier leg after a fatal model error (ms).
pub const CARRIER_CLOSE_ON_FATAL_MS: u64 = 500;

/// Wall-clock bound for answering a model tool call (ms). The stub response
/// is sent when no handler produces a result inside this window.
pub const TOOL_RESPONSE_TIMEOUT_MS: u64 = 2000;

// ─────────────────────────────────────────────────────────────────────────────
// Reconnection
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum reconnection attempts after an unsolicited transient close.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 3;

/// Initial reconnection backoff delay (ms). Doubles per attempt.
pub const RECONNECT_BASE_DELAY_MS: u64 = 250;

/// Reconnection backoff cap (ms).
pub const RECONNECT_MAX_DELAY_MS: u64 = 4000;

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Per-call retry budget for persistence writes (seconds). Once exhausted the
/// call downgrades to record-only-partial instead of blocking or failing.
pub const RECORD_RETRY_BUDGET_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// API / Control
// ─────────────────────────────────────────────────────────────────────────────

/// Default path for carrier media-stream WebSocket upgrades.
pub const CARRIER_WS_PATH: &str = "/twilio";

/// Capacity of the control broadcast channel (emergency stop commands).
pub const CONTROL_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the per-call model event channel.
pub const MODEL_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the per-call carrier event channel.
pub const CARRIER_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Prefix for turn-delivery marks injected after each model turn.
pub const MARK_PREFIX: &str = "turn-";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in logs and outbound dial metadata.
pub const APP_NAME: &str = "Voxlink";

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "voxlink-gateway";
