//! Carrier WebSocket upgrade handling.
//!
//! One accepted upgrade becomes one carrier session and one orchestrator.
//! The handler's lifetime is the call's lifetime; the orchestrator registers
//! the call in the live-call registry and the registry's shutdown token
//! unwinds it on stop.

use axum::extract::ws::WebSocket;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::api::AppState;
use crate::call::{run_call, OrchestratorDeps};
use crate::carrier::CarrierSession;

/// Upgrade handler for the carrier media-stream endpoint.
pub async fn carrier_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_carrier_socket(socket, state))
}

/// Runs one call on an accepted carrier socket.
async fn handle_carrier_socket(socket: WebSocket, state: AppState) {
    // Call-scoped cancellation, child of the registry's shutdown token
    let cancel = state.calls.issue_token();
    let carrier = CarrierSession::spawn(socket, cancel.child_token());

    let deps = OrchestratorDeps {
        routing: state.routing.clone(),
        recorder: state.recorder.clone(),
        connector: state.connector.clone(),
        control: state.control.clone(),
        tools: state.tools.clone(),
        registry: state.calls.clone(),
        limits: state.config.limits,
        stats: state.stats.clone(),
    };

    let call = run_call(carrier, deps, cancel).await;

    // Flush the call's durable writes before the handler returns
    state.recorder.drain(call.id).await;
}
