//! Call lifecycle: records, state machine, orchestration, and control.

pub mod control;
pub mod orchestrator;
pub mod record;
pub mod registry;

pub use control::{ControlChannel, ControlCommand, StopScope};
pub use orchestrator::{run_call, OrchestratorDeps, StubToolHandler, ToolHandler};
pub use record::{
    Call, CallDirection, CallEvent, CallStatus, Speaker, ToolCallRecord, TranscriptFragment,
    TransitionError,
};
pub use registry::{CallRegistration, CallRegistry};
