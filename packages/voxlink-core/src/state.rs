//! Core configuration and runtime counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    CARRIER_WS_PATH, HANDOVER_BLACKOUT_BUDGET_MS, IDLE_TIMEOUT_SECS, MODEL_WS_ENDPOINT,
    SETUP_TIMEOUT_SECS, TOOL_RESPONSE_TIMEOUT_MS,
};

/// Carrier account credentials and dial-out settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarrierConfig {
    /// Carrier account identifier.
    pub account_sid: String,
    /// Carrier API auth token.
    pub auth_token: String,
    /// Number outbound calls are placed from. Only required for dial-out.
    #[serde(default)]
    pub dialout_number: Option<String>,
    /// Carrier REST API base URL.
    #[serde(default = "default_carrier_api")]
    pub api_base: String,
}

fn default_carrier_api() -> String {
    "https://api.twilio.com".to_string()
}

/// Model API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelApiConfig {
    pub api_key: String,
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
}

fn default_model_endpoint() -> String {
    MODEL_WS_ENDPOINT.to_string()
}

impl Default for ModelApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_model_endpoint(),
        }
    }
}

/// Persistence store access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub url: String,
    pub api_key: String,
}

/// Per-call timing limits.
///
/// Defaults come from the protocol constants; deployments override them via
/// the server configuration when their carrier or model behaves differently.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CallLimits {
    /// Carrier connect to established call (seconds).
    pub setup_timeout_secs: u64,
    /// Inbound silence before the idle prompt / abandon (seconds).
    pub idle_timeout_secs: u64,
    /// Maximum carrier-observable blackout during a handover (ms).
    pub handover_budget_ms: u64,
    /// Wall-clock bound for tool responses (ms).
    pub tool_timeout_ms: u64,
}

impl CallLimits {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn handover_budget(&self) -> Duration {
        Duration::from_millis(self.handover_budget_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Validates the configured values.
    pub fn validate(&self) -> Result<(), String> {
        if self.setup_timeout_secs == 0 {
            return Err("setup_timeout_secs must be >= 1".to_string());
        }
        if self.idle_timeout_secs == 0 {
            return Err("idle_timeout_secs must be >= 1".to_string());
        }
        if self.handover_budget_ms == 0 {
            return Err("handover_budget_ms must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for CallLimits {
    fn default() -> Self {
        Self {
            setup_timeout_secs: SETUP_TIMEOUT_SECS,
            idle_timeout_secs: IDLE_TIMEOUT_SECS,
            handover_budget_ms: HANDOVER_BLACKOUT_BUDGET_MS,
            tool_timeout_ms: TOOL_RESPONSE_TIMEOUT_MS,
        }
    }
}

/// Configuration for the gateway core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Preferred port for the HTTP/WS listener (0 = auto-allocate).
    pub bind_port: u16,

    /// Path the carrier upgrades its media-stream WebSocket on.
    #[serde(default = "default_ws_path")]
    pub carrier_ws_path: String,

    /// Public base URL of this gateway (e.g. "wss://gw.example.com").
    /// Required for outbound dialing: the carrier needs a reachable
    /// callback for the media stream.
    #[serde(default)]
    pub public_url: Option<String>,

    pub carrier: CarrierConfig,
    pub model: ModelApiConfig,
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub limits: CallLimits,
}

fn default_ws_path() -> String {
    CARRIER_WS_PATH.to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_port: 0,
            carrier_ws_path: default_ws_path(),
            public_url: None,
            carrier: CarrierConfig::default(),
            model: ModelApiConfig::default(),
            persistence: PersistenceConfig::default(),
            limits: CallLimits::default(),
        }
    }
}

impl GatewayConfig {
    /// Validates required settings. Startup exits non-zero on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.carrier.account_sid.trim().is_empty() {
            return Err("carrier account SID is required (VOXLINK_CARRIER_SID)".to_string());
        }
        if self.carrier.auth_token.trim().is_empty() {
            return Err("carrier auth token is required (VOXLINK_CARRIER_TOKEN)".to_string());
        }
        if self.model.api_key.trim().is_empty() {
            return Err("model API key is required (VOXLINK_MODEL_API_KEY)".to_string());
        }
        if self.persistence.url.trim().is_empty() {
            return Err("persistence URL is required (VOXLINK_PERSISTENCE_URL)".to_string());
        }
        if self.persistence.api_key.trim().is_empty() {
            return Err("persistence key is required (VOXLINK_PERSISTENCE_KEY)".to_string());
        }
        if !self.carrier_ws_path.starts_with('/') {
            return Err("carrier_ws_path must start with '/'".to_string());
        }
        self.limits.validate()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Counters
// ─────────────────────────────────────────────────────────────────────────────

/// Gateway-wide counters, surfaced by the health endpoint. Live-call state
/// lives in the call registry; these are lifetime totals.
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub calls_handled: AtomicU64,
    /// Calls refused at resolve time because the agent was at capacity.
    pub refused_overload: AtomicU64,
    /// Calls refused because the caller is on the do-not-call set.
    pub refused_dnc: AtomicU64,
}

impl GatewayStats {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "callsHandled": self.calls_handled.load(Ordering::Relaxed),
            "refusedOverload": self.refused_overload.load(Ordering::Relaxed),
            "refusedDnc": self.refused_dnc.load(Ordering::Relaxed),
        })
    }
}
