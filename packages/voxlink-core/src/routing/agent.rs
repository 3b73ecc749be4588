//! Agent personas and their routing attributes.
//!
//! An [`AgentConfig`] is the validated, immutable description of one persona:
//! which model and voice it speaks with, when it answers (direction policy,
//! business hours), and how many calls it may carry at once. Configurations
//! are validated at construction so a broken agent fails loudly at load time,
//! never mid-call.

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::model::{ConfigError, SessionConfig, VadTuning};

/// Errors from agent configuration validation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent id must be non-empty")]
    EmptyId,

    #[error("Forward routing requires a forward target")]
    MissingForwardTarget,

    #[error("max_concurrent_calls must be >= 1")]
    ZeroConcurrency,

    #[error(transparent)]
    Session(#[from] ConfigError),
}

/// Which call directions an agent accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionPolicy {
    Inbound,
    Outbound,
    Both,
}

impl DirectionPolicy {
    /// True when this policy admits the given direction.
    #[must_use]
    pub fn admits(&self, direction: crate::call::CallDirection) -> bool {
        use crate::call::CallDirection;
        match self {
            Self::Both => true,
            Self::Inbound => direction == CallDirection::Inbound,
            Self::Outbound => direction == CallDirection::Outbound,
        }
    }
}

/// How a resolved agent handles the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingType {
    /// Bridge the caller straight to the agent persona.
    Direct,
    /// Present a menu first (menu content lives outside the core).
    Menu,
    /// Hand the call off to another number.
    Forward,
}

/// Weekly business-hours window in the agent's own timezone.
///
/// `open == close` means always open (the ambiguous window resolves to
/// "open"); `close < open` wraps past midnight.
#[derive(Debug, Clone)]
pub struct BusinessHours {
    /// IANA timezone name, e.g. "America/Chicago". Parse failures fall back
    /// to UTC with a logged warning.
    pub timezone: String,
    /// Monday-first day mask.
    pub days: [bool; 7],
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl BusinessHours {
    /// Around-the-clock window.
    pub fn always() -> Self {
        Self {
            timezone: "UTC".to_string(),
            days: [true; 7],
            open: NaiveTime::MIN,
            close: NaiveTime::MIN,
        }
    }

    /// True when `now` falls inside the window, evaluated in the agent's
    /// timezone.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let tz: Tz = match self.timezone.parse() {
            Ok(tz) => tz,
            Err(_) => {
                log::warn!(
                    "[Routing] Unparseable timezone {:?}, falling back to UTC",
                    self.timezone
                );
                chrono_tz::UTC
            }
        };
        let local = now.with_timezone(&tz);
        let weekday = local.weekday().num_days_from_monday() as usize;
        let time = local.time();

        if self.open == self.close {
            // Ambiguous window resolves to open
            return self.days[weekday];
        }

        if self.open < self.close {
            self.days[weekday] && time >= self.open && time < self.close
        } else {
            // Overnight window, e.g. 22:00–06:00: the early-morning side
            // belongs to the previous day's mask.
            let prev = (weekday + 6) % 7;
            (self.days[weekday] && time >= self.open) || (self.days[prev] && time < self.close)
        }
    }
}

/// Immutable configuration for one agent persona.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    /// Model session parameters (model, voice, language, prompt, VAD).
    pub session: SessionConfig,
    pub direction_policy: DirectionPolicy,
    pub routing: RoutingType,
    /// Target number when `routing` is `Forward`.
    pub forward_to: Option<String>,
    pub hours: BusinessHours,
    pub max_concurrent_calls: usize,
    /// Preferred agent for the tenant when no number mapping applies.
    pub primary: bool,
    /// Disabled agents never resolve.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl AgentConfig {
    /// Validates cross-field constraints. The embedded session config has
    /// already been validated by its own builder.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.id.trim().is_empty() {
            return Err(AgentError::EmptyId);
        }
        if self.routing == RoutingType::Forward && self.forward_to.is_none() {
            return Err(AgentError::MissingForwardTarget);
        }
        if self.max_concurrent_calls == 0 {
            return Err(AgentError::ZeroConcurrency);
        }
        Ok(())
    }

    /// Convenience constructor for a directly-routed agent.
    pub fn direct(
        id: impl Into<String>,
        name: impl Into<String>,
        session: SessionConfig,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            session,
            direction_policy: DirectionPolicy::Both,
            routing: RoutingType::Direct,
            forward_to: None,
            hours: BusinessHours::always(),
            max_concurrent_calls: 10,
            primary: false,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// VAD tuning for this agent's sessions.
    #[must_use]
    pub fn vad(&self) -> VadTuning {
        self.session.vad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session() -> SessionConfig {
        SessionConfig::builder()
            .model("gemini-2.0-flash-live-001")
            .voice("Puck")
            .language("en-US")
            .system_prompt("Answer calls.")
            .build()
            .unwrap()
    }

    fn hours(timezone: &str, open: (u32, u32), close: (u32, u32)) -> BusinessHours {
        BusinessHours {
            timezone: timezone.to_string(),
            days: [true; 7],
            open: NaiveTime::from_hms_opt(open.0, open.1, 0).unwrap(),
            close: NaiveTime::from_hms_opt(close.0, close.1, 0).unwrap(),
        }
    }

    #[test]
    fn always_open_window_contains_any_instant() {
        let window = BusinessHours::always();
        assert!(window.contains(Utc::now()));
    }

    #[test]
    fn window_evaluated_in_agent_timezone() {
        // 15:00 UTC is 10:00 in Chicago (CDT, July) - inside 9-17 local
        let window = hours("America/Chicago", (9, 0), (17, 0));
        let now = Utc.with_ymd_and_hms(2026, 7, 15, 15, 0, 0).unwrap();
        assert!(window.contains(now));

        // 03:00 UTC is 22:00 the previous evening in Chicago - outside
        let now = Utc.with_ymd_and_hms(2026, 7, 15, 3, 0, 0).unwrap();
        assert!(!window.contains(now));
    }

    #[test]
    fn bad_timezone_falls_back_to_utc() {
        let window = hours("Mars/Olympus_Mons", (9, 0), (17, 0));
        let inside_utc = Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap();
        let outside_utc = Utc.with_ymd_and_hms(2026, 7, 15, 3, 0, 0).unwrap();
        assert!(window.contains(inside_utc));
        assert!(!window.contains(outside_utc));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let window = hours("UTC", (22, 0), (6, 0));
        let late = Utc.with_ymd_and_hms(2026, 7, 15, 23, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2026, 7, 15, 4, 0, 0).unwrap();
        let midday = Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap();
        assert!(window.contains(late));
        assert!(window.contains(early));
        assert!(!window.contains(midday));
    }

    #[test]
    fn day_mask_excludes_closed_days() {
        let mut window = hours("UTC", (9, 0), (17, 0));
        // 2026-07-15 is a Wednesday (index 2)
        window.days[2] = false;
        let wednesday = Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap();
        let thursday = Utc.with_ymd_and_hms(2026, 7, 16, 12, 0, 0).unwrap();
        assert!(!window.contains(wednesday));
        assert!(window.contains(thursday));
    }

    #[test]
    fn forward_agent_requires_target() {
        let mut agent = AgentConfig::direct("a1", "Front desk", session());
        agent.routing = RoutingType::Forward;
        assert!(matches!(
            agent.validate(),
            Err(AgentError::MissingForwardTarget)
        ));

        agent.forward_to = Some("+15550003333".into());
        assert!(agent.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut agent = AgentConfig::direct("a1", "Front desk", session());
        agent.max_concurrent_calls = 0;
        assert!(matches!(agent.validate(), Err(AgentError::ZeroConcurrency)));
    }

    #[test]
    fn direction_policy_admits() {
        use crate::call::CallDirection;
        assert!(DirectionPolicy::Both.admits(CallDirection::Inbound));
        assert!(DirectionPolicy::Inbound.admits(CallDirection::Inbound));
        assert!(!DirectionPolicy::Inbound.admits(CallDirection::Outbound));
        assert!(DirectionPolicy::Outbound.admits(CallDirection::Outbound));
    }
}
