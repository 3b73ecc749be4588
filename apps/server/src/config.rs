//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! The YAML file also carries the agent roster, number mappings, and the
//! do-not-call set that seed the routing table.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use voxlink_core::routing::{
    AgentConfig, BusinessHours, DirectionPolicy, NumberMapping, RoutingSnapshot, RoutingType,
};
use voxlink_core::{CallLimits, GatewayConfig, SessionConfig, VadTuning};

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `VOXLINK_BIND_PORT`
    pub bind_port: u16,

    /// Path the carrier upgrades its media-stream WebSocket on.
    pub carrier_ws_path: Option<String>,

    /// Public base URL of this gateway (needed for outbound dialing).
    /// Override: `VOXLINK_PUBLIC_URL`
    pub public_url: Option<String>,

    /// Carrier account SID. Override: `VOXLINK_CARRIER_SID`
    pub carrier_sid: String,
    /// Carrier auth token. Override: `VOXLINK_CARRIER_TOKEN`
    pub carrier_token: String,
    /// Dial-out number. Override: `VOXLINK_DIALOUT_NUMBER`
    pub dialout_number: Option<String>,

    /// Model API key. Override: `VOXLINK_MODEL_API_KEY`
    pub model_api_key: String,
    /// Model endpoint override (testing against a proxy).
    pub model_endpoint: Option<String>,

    /// Persistence store URL. Override: `VOXLINK_PERSISTENCE_URL`
    pub persistence_url: String,
    /// Persistence store key. Override: `VOXLINK_PERSISTENCE_KEY`
    pub persistence_key: String,

    /// Per-call timing limits.
    pub limits: Option<CallLimits>,

    /// Agent roster.
    pub agents: Vec<AgentSpec>,
    /// Dialed-number prefix to agent mappings.
    pub number_map: Vec<NumberMapSpec>,
    /// Do-not-call numbers.
    pub dnc: Vec<String>,
}

/// One agent as written in the config file.
#[derive(Debug, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub name: String,
    pub model: String,
    pub voice: String,
    pub language: String,
    pub system_prompt: String,
    /// "inbound", "outbound", or "both" (default).
    #[serde(default)]
    pub direction: Option<String>,
    /// "direct" (default), "menu", or "forward".
    #[serde(default)]
    pub routing: Option<String>,
    #[serde(default)]
    pub forward_to: Option<String>,
    /// IANA timezone for business hours; UTC when omitted.
    #[serde(default)]
    pub timezone: Option<String>,
    /// "HH:MM" opening time; around-the-clock when omitted.
    #[serde(default)]
    pub open: Option<String>,
    #[serde(default)]
    pub close: Option<String>,
    /// Monday-first closed-day names, e.g. ["sat", "sun"].
    #[serde(default)]
    pub closed_days: Vec<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_calls: usize,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub vad: Option<VadSpec>,
    /// Request sliding-window compression for extended sessions.
    #[serde(default)]
    pub extended_sessions: bool,
    /// Enable input/output transcription (default true; transcripts feed
    /// the persisted call record).
    #[serde(default = "default_true")]
    pub transcription: bool,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct VadSpec {
    #[serde(default)]
    pub start_sensitivity: Option<String>,
    #[serde(default)]
    pub end_sensitivity: Option<String>,
    #[serde(default)]
    pub silence_duration_ms: Option<u32>,
    #[serde(default)]
    pub prefix_padding_ms: Option<u32>,
    #[serde(default = "default_true")]
    pub automatic: bool,
}

#[derive(Debug, Deserialize)]
pub struct NumberMapSpec {
    pub prefix: String,
    pub agent_id: String,
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VOXLINK_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }
        if let Ok(val) = std::env::var("VOXLINK_PUBLIC_URL") {
            self.public_url = Some(val);
        }
        if let Ok(val) = std::env::var("VOXLINK_CARRIER_SID") {
            self.carrier_sid = val;
        }
        if let Ok(val) = std::env::var("VOXLINK_CARRIER_TOKEN") {
            self.carrier_token = val;
        }
        if let Ok(val) = std::env::var("VOXLINK_DIALOUT_NUMBER") {
            self.dialout_number = Some(val);
        }
        if let Ok(val) = std::env::var("VOXLINK_MODEL_API_KEY") {
            self.model_api_key = val;
        }
        if let Ok(val) = std::env::var("VOXLINK_PERSISTENCE_URL") {
            self.persistence_url = val;
        }
        if let Ok(val) = std::env::var("VOXLINK_PERSISTENCE_KEY") {
            self.persistence_key = val;
        }
    }

    /// Converts to voxlink-core's config type.
    pub fn to_core_config(&self) -> GatewayConfig {
        let mut config = GatewayConfig {
            bind_port: self.bind_port,
            public_url: self.public_url.clone(),
            ..GatewayConfig::default()
        };
        if let Some(path) = &self.carrier_ws_path {
            config.carrier_ws_path = path.clone();
        }
        config.carrier.account_sid = self.carrier_sid.clone();
        config.carrier.auth_token = self.carrier_token.clone();
        config.carrier.dialout_number = self.dialout_number.clone();
        config.model.api_key = self.model_api_key.clone();
        if let Some(endpoint) = &self.model_endpoint {
            config.model.endpoint = endpoint.clone();
        }
        config.persistence.url = self.persistence_url.clone();
        config.persistence.api_key = self.persistence_key.clone();
        if let Some(limits) = self.limits {
            config.limits = limits;
        }
        config
    }

    /// Builds the initial routing snapshot from the configured roster.
    pub fn to_routing_snapshot(&self) -> Result<RoutingSnapshot> {
        let mut agents = Vec::with_capacity(self.agents.len());
        for spec in &self.agents {
            agents.push(Arc::new(build_agent(spec)?));
        }

        for mapping in &self.number_map {
            if !agents.iter().any(|a| a.id == mapping.agent_id) {
                bail!(
                    "number_map entry {:?} references unknown agent {:?}",
                    mapping.prefix,
                    mapping.agent_id
                );
            }
        }

        Ok(RoutingSnapshot {
            agents,
            number_map: self
                .number_map
                .iter()
                .map(|m| NumberMapping {
                    prefix: m.prefix.clone(),
                    agent_id: m.agent_id.clone(),
                })
                .collect(),
            dnc: self.dnc.iter().cloned().collect::<HashSet<_>>(),
        })
    }
}

fn build_agent(spec: &AgentSpec) -> Result<AgentConfig> {
    let vad = build_vad(spec.vad.as_ref())
        .with_context(|| format!("agent {:?}: invalid VAD tuning", spec.id))?;

    let session = SessionConfig::builder()
        .model(&spec.model)
        .voice(&spec.voice)
        .language(&spec.language)
        .system_prompt(&spec.system_prompt)
        .vad(vad)
        .transcription(spec.transcription, spec.transcription)
        .context_compression(spec.extended_sessions)
        .build()
        .with_context(|| format!("agent {:?}: invalid session config", spec.id))?;

    let direction_policy = match spec.direction.as_deref() {
        None | Some("both") => DirectionPolicy::Both,
        Some("inbound") => DirectionPolicy::Inbound,
        Some("outbound") => DirectionPolicy::Outbound,
        Some(other) => bail!("agent {:?}: unknown direction {:?}", spec.id, other),
    };

    let routing = match spec.routing.as_deref() {
        None | Some("direct") => RoutingType::Direct,
        Some("menu") => RoutingType::Menu,
        Some("forward") => RoutingType::Forward,
        Some(other) => bail!("agent {:?}: unknown routing type {:?}", spec.id, other),
    };

    let mut agent = AgentConfig::direct(spec.id.clone(), spec.name.clone(), session);
    agent.direction_policy = direction_policy;
    agent.routing = routing;
    agent.forward_to = spec.forward_to.clone();
    agent.hours = build_hours(spec)?;
    agent.max_concurrent_calls = spec.max_concurrent_calls;
    agent.primary = spec.primary;

    agent
        .validate()
        .with_context(|| format!("agent {:?}: invalid configuration", spec.id))?;
    Ok(agent)
}

fn build_vad(spec: Option<&VadSpec>) -> Result<VadTuning> {
    let Some(spec) = spec else {
        return Ok(VadTuning::default());
    };
    let mut vad = VadTuning {
        automatic: spec.automatic,
        ..VadTuning::default()
    };
    if let Some(s) = &spec.start_sensitivity {
        vad.start_sensitivity = s.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    if let Some(s) = &spec.end_sensitivity {
        vad.end_sensitivity = s.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    if let Some(ms) = spec.silence_duration_ms {
        vad.silence_duration_ms = ms;
    }
    if let Some(ms) = spec.prefix_padding_ms {
        vad.prefix_padding_ms = ms;
    }
    Ok(vad)
}

fn build_hours(spec: &AgentSpec) -> Result<BusinessHours> {
    let mut hours = BusinessHours::always();
    if let Some(tz) = &spec.timezone {
        hours.timezone = tz.clone();
    }

    match (&spec.open, &spec.close) {
        (Some(open), Some(close)) => {
            hours.open = NaiveTime::parse_from_str(open, "%H:%M")
                .with_context(|| format!("agent {:?}: bad open time {:?}", spec.id, open))?;
            hours.close = NaiveTime::parse_from_str(close, "%H:%M")
                .with_context(|| format!("agent {:?}: bad close time {:?}", spec.id, close))?;
        }
        (None, None) => {}
        _ => bail!("agent {:?}: open and close must be set together", spec.id),
    }

    for day in &spec.closed_days {
        let index = match day.to_lowercase().as_str() {
            "mon" | "monday" => 0,
            "tue" | "tuesday" => 1,
            "wed" | "wednesday" => 2,
            "thu" | "thursday" => 3,
            "fri" | "friday" => 4,
            "sat" | "saturday" => 5,
            "sun" | "sunday" => 6,
            other => bail!("agent {:?}: unknown day {:?}", spec.id, other),
        };
        hours.days[index] = false;
    }
    Ok(hours)
}
