//! Model-side streaming session.
//!
//! One session per call against the model's realtime WebSocket API:
//! configure, stream caller audio up, receive audio/transcripts/control
//! events down, survive GoAway handovers and transient disconnects via
//! resumption handles.

pub mod config;
pub mod protocol;
pub mod session;

pub use config::{ConfigError, SessionConfig, SessionConfigBuilder, VadSensitivity, VadTuning, Voice};
pub use protocol::{FunctionCall, ToolScheduling};
pub use session::{
    CloseReason, GeminiConnector, ModelConnector, ModelError, ModelEvent, ModelTransport,
    SendAudio,
};
