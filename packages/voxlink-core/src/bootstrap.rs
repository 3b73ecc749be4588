//! Application bootstrap and dependency wiring.
//!
//! The composition root - the single place where all services are
//! instantiated and wired together:
//!
//! - **Clarity**: all dependency relationships are visible in one place
//! - **Testability**: easy to swap implementations for testing
//! - **Maintainability**: service creation logic is isolated from usage

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::call::{CallRegistry, ControlChannel, StubToolHandler, ToolHandler};
use crate::carrier::CarrierDialer;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{GeminiConnector, ModelConnector};
use crate::recorder::{CallRecorder, HttpPersistence, Persistence};
use crate::routing::{RoutingSnapshot, RoutingTable};
use crate::state::{GatewayConfig, GatewayStats};

/// Timeout for carrier REST and persistence HTTP requests (seconds).
const HTTP_TIMEOUT_SECS: u64 = 10;

/// Container for all bootstrapped services.
///
/// Consumed by [`AppState`] to build the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub routing: Arc<RoutingTable>,
    pub recorder: Arc<CallRecorder>,
    pub connector: Arc<dyn ModelConnector>,
    pub control: ControlChannel,
    pub tools: Arc<dyn ToolHandler>,
    pub dialer: Option<Arc<CarrierDialer>>,
    pub calls: Arc<CallRegistry>,
    pub stats: Arc<GatewayStats>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl std::fmt::Debug for BootstrappedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrappedServices").finish_non_exhaustive()
    }
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Initiates graceful shutdown: every live call's token is cancelled
    /// and the call flows unwind within the cancellation grace period.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.cancel_token.cancel();
        let stopped = self.calls.stop_all();
        log::info!("[Bootstrap] Signalled {} live call(s)", stopped);

        log::info!("[Bootstrap] Shutdown complete");
    }

    /// Builds the API state from these services.
    pub fn app_state(&self, config: Arc<GatewayConfig>) -> AppState {
        AppState {
            routing: Arc::clone(&self.routing),
            recorder: Arc::clone(&self.recorder),
            connector: Arc::clone(&self.connector),
            control: self.control.clone(),
            tools: Arc::clone(&self.tools),
            dialer: self.dialer.clone(),
            calls: Arc::clone(&self.calls),
            config,
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Creates the shared HTTP client for carrier REST and persistence traffic.
fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order matters - services are created in dependency order:
///
/// 1. Shared infrastructure (HTTP client, cancellation token)
/// 2. Persistence + recorder
/// 3. Routing table (initial snapshot; ingestion swaps in new generations)
/// 4. Model connector
/// 5. Dialer (only when dial-out is configured)
///
/// # Errors
///
/// Returns an error when the configuration fails validation.
pub fn bootstrap_services(
    config: &GatewayConfig,
    routing_snapshot: RoutingSnapshot,
) -> GatewayResult<BootstrappedServices> {
    config
        .validate()
        .map_err(GatewayError::Configuration)?;

    let http_client = create_http_client();
    let cancel_token = CancellationToken::new();

    let persistence: Arc<dyn Persistence> = Arc::new(HttpPersistence::new(
        http_client.clone(),
        config.persistence.url.clone(),
        config.persistence.api_key.clone(),
    ));
    let recorder = Arc::new(CallRecorder::new(persistence));

    let routing = Arc::new(RoutingTable::new(routing_snapshot));

    let connector: Arc<dyn ModelConnector> = Arc::new(GeminiConnector::new(
        config.model.endpoint.clone(),
        config.model.api_key.clone(),
    ));

    // Dial-out needs both a from-number and a public callback URL
    let dialer = match (&config.carrier.dialout_number, &config.public_url) {
        (Some(number), Some(public_url)) => Some(Arc::new(CarrierDialer::new(
            http_client.clone(),
            config.carrier.api_base.clone(),
            config.carrier.account_sid.clone(),
            config.carrier.auth_token.clone(),
            number.clone(),
            format!(
                "{}{}",
                public_url.trim_end_matches('/'),
                config.carrier_ws_path
            ),
        ))),
        _ => {
            log::info!("[Bootstrap] Dial-out not configured - /dial disabled");
            None
        }
    };

    Ok(BootstrappedServices {
        routing,
        recorder,
        connector,
        control: ControlChannel::new(),
        tools: Arc::new(StubToolHandler),
        dialer,
        calls: Arc::new(CallRegistry::new()),
        stats: Arc::new(GatewayStats::default()),
        http_client,
        cancel_token,
    })
}
