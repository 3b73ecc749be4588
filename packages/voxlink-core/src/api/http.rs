//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use axum::extract::{Path, State};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::ws::carrier_ws_handler;
use crate::api::AppState;
use crate::call::StopScope;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol_constants::SERVICE_ID;

/// Builds the gateway router: health, the carrier media-stream endpoint,
/// outbound dialing, and the operational control surface.
pub fn create_router(state: AppState) -> Router {
    let carrier_path = state.config.carrier_ws_path.clone();
    Router::new()
        .route("/health", get(health))
        .route(&carrier_path, any(carrier_ws_handler))
        .route("/dial", post(dial))
        .route("/control/emergency-stop", post(emergency_stop))
        .route("/control/agents/{agent_id}", post(toggle_agent))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Service identity and liveness, the gateway counters, and a listing of
/// the calls currently on the bridge.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_ID,
        "version": env!("CARGO_PKG_VERSION"),
        "activeCalls": state.calls.active_count(),
        "calls": state.calls.snapshot(),
        "stats": state.stats.to_json(),
    }))
}

#[derive(Deserialize)]
struct DialRequest {
    to: String,
}

/// Places an outbound call through the carrier.
async fn dial(
    State(state): State<AppState>,
    Json(request): Json<DialRequest>,
) -> GatewayResult<Json<serde_json::Value>> {
    if request.to.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("'to' must be non-empty".into()));
    }
    let dialer = state.dialer.as_ref().ok_or_else(|| {
        GatewayError::DialNotConfigured("set a dial-out number to enable /dial".into())
    })?;

    let call_sid = dialer.dial(&request.to).await?;
    Ok(Json(json!({ "callSid": call_sid })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmergencyStopRequest {
    /// "tenant", "agent", or "call".
    scope: String,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    call_id: Option<Uuid>,
}

/// Stops calls out-of-band: one call, one agent's calls, or everything.
async fn emergency_stop(
    State(state): State<AppState>,
    Json(request): Json<EmergencyStopRequest>,
) -> GatewayResult<Json<serde_json::Value>> {
    let scope = match request.scope.as_str() {
        "tenant" => StopScope::Tenant,
        "agent" => StopScope::Agent(request.agent_id.ok_or_else(|| {
            GatewayError::InvalidRequest("agent scope requires agentId".into())
        })?),
        "call" => StopScope::Call(request.call_id.ok_or_else(|| {
            GatewayError::InvalidRequest("call scope requires callId".into())
        })?),
        other => {
            return Err(GatewayError::InvalidRequest(format!(
                "unknown scope {other:?}"
            )))
        }
    };

    let reached = state.control.emergency_stop(scope);
    Ok(Json(json!({ "signalled": reached })))
}

#[derive(Deserialize)]
struct ToggleAgentRequest {
    active: bool,
}

/// Enables or disables an agent for new calls.
async fn toggle_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<ToggleAgentRequest>,
) -> GatewayResult<Json<serde_json::Value>> {
    if !state.routing.set_agent_active(&agent_id, request.active) {
        return Err(GatewayError::AgentNotFound(agent_id));
    }
    Ok(Json(json!({ "agentId": agent_id, "active": request.active })))
}
