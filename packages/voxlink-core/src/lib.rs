//! Voxlink Core - realtime telephony-to-model voice gateway.
//!
//! This crate bridges a telephony carrier's media-stream WebSocket protocol
//! (8 kHz μ-law) to a cloud conversational model's realtime session protocol
//! (16 kHz PCM in, 24 kHz PCM out). For each call it runs two long-lived
//! streaming connections, transcodes audio in both directions, applies
//! turn-taking control (barge-in), routes the call to an agent persona, and
//! persists structured call records and transcripts.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`audio`]: pure transcoding between carrier and model formats
//! - [`carrier`]: the carrier's media-stream sub-protocol and paced output
//! - [`model`]: model session management (connect, stream, handover, resume)
//! - [`routing`]: agent personas and deterministic call routing
//! - [`call`]: per-call orchestration and operational control
//! - [`recorder`]: durable call records at the persistence boundary
//! - [`api`]: HTTP/WebSocket listener and control surface
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! Capability-scoped interfaces decouple the orchestrator from transports:
//!
//! - [`CarrierTransport`](carrier::CarrierTransport): the carrier leg
//! - [`ModelTransport`](model::ModelTransport) / [`ModelConnector`](model::ModelConnector): the model leg
//! - [`Persistence`](recorder::Persistence): the durable store
//! - [`ToolHandler`](call::ToolHandler): tool-call responses
//!
//! Each trait has a production implementation suitable for the standalone
//! server; tests substitute channel-backed fakes.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod call;
pub mod carrier;
pub mod error;
pub mod model;
pub mod protocol_constants;
pub mod recorder;
pub mod routing;
pub mod state;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, ServerError};
pub use audio::{AudioFormat, CallCodec, CodecError};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use call::{
    run_call, Call, CallDirection, CallEvent, CallRegistry, CallStatus, ControlChannel,
    OrchestratorDeps, StopScope, StubToolHandler, ToolHandler,
};
pub use carrier::{CarrierEvent, CarrierSession, CarrierTransport, StartInfo};
pub use error::{ErrorCode, GatewayError, GatewayResult};
pub use model::{
    ModelConnector, ModelError, ModelEvent, ModelTransport, SessionConfig, VadTuning, Voice,
};
pub use recorder::{CallRecorder, HttpPersistence, MemoryPersistence, Persistence};
pub use routing::{AgentConfig, RoutingSnapshot, RoutingTable};
pub use state::{CallLimits, GatewayConfig, GatewayStats};
