//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to services. It provides
//! router construction and server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::call::{CallRegistry, ControlChannel, ToolHandler};
use crate::carrier::CarrierDialer;
use crate::model::ModelConnector;
use crate::recorder::CallRecorder;
use crate::routing::RoutingTable;
use crate::state::{GatewayConfig, GatewayStats};

pub mod http;
pub mod ws;

/// Errors that can occur when starting or running the server.
///
/// The carrier's webhook is configured with one fixed endpoint, so there is
/// no port fallback: the configured port binds or startup fails.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin wrapper holding references to services; all business logic lives
/// in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Routing table and agent registry.
    pub routing: Arc<RoutingTable>,
    /// Lifecycle recorder flushing to the persistence boundary.
    pub recorder: Arc<CallRecorder>,
    /// Opens model sessions for orchestrators.
    pub connector: Arc<dyn ModelConnector>,
    /// Operational control fan-out.
    pub control: ControlChannel,
    /// Tool-call handler injected into orchestrators.
    pub tools: Arc<dyn ToolHandler>,
    /// Outbound dialer; absent when no dial-out number is configured.
    pub dialer: Option<Arc<CarrierDialer>>,
    /// Calls currently on the bridge.
    pub calls: Arc<CallRegistry>,
    /// Gateway configuration snapshot.
    pub config: Arc<GatewayConfig>,
    /// Gateway-wide counters.
    pub stats: Arc<GatewayStats>,
}

/// Starts the HTTP server on the configured port.
///
/// Port 0 asks the OS for an ephemeral port - useful for tests, useless in
/// production where the carrier webhook needs a stable endpoint; the actual
/// bound address is logged either way.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.bind_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;

    log::info!(
        "Listening on http://{} (carrier stream at {})",
        bound,
        state.config.carrier_ws_path
    );

    let app = http::create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
