//! Call routing: from (direction, numbers, time) to an agent.
//!
//! The routing table is a versioned immutable snapshot behind a lock —
//! readers clone an `Arc` at call start and never observe partial updates.
//! Live per-agent call counts are tracked separately by an RAII permit gauge
//! so that snapshot swaps don't disturb in-flight accounting.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use super::agent::{AgentConfig, RoutingType};
use crate::call::CallDirection;

/// Maps a dialed-number prefix to an agent. Longer prefixes win.
#[derive(Debug, Clone)]
pub struct NumberMapping {
    pub prefix: String,
    pub agent_id: String,
}

/// One immutable generation of routing state.
#[derive(Default)]
pub struct RoutingSnapshot {
    pub agents: Vec<Arc<AgentConfig>>,
    pub number_map: Vec<NumberMapping>,
    /// Numbers that must never be connected.
    pub dnc: HashSet<String>,
}

impl RoutingSnapshot {
    fn agent(&self, id: &str) -> Option<&Arc<AgentConfig>> {
        self.agents.iter().find(|a| a.id == id)
    }
}

/// Why a call was refused at resolve time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Calling number is on the do-not-call set.
    DncBlock,
    /// The chosen agent is at its concurrent-call maximum.
    Overloaded,
    /// No active agent admits this direction at this time.
    NoAgentAvailable,
}

impl RejectReason {
    /// Persisted failure reason string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DncBlock => "dnc_block",
            Self::Overloaded => "overloaded",
            Self::NoAgentAvailable => "missing_agent",
        }
    }
}

/// Outcome of routing resolution.
pub enum Resolution {
    /// Connect the call to this agent. The permit holds the agent's
    /// concurrency slot until dropped.
    Agent(Arc<AgentConfig>, CallPermit),
    /// Hand the call to another number instead of connecting an agent.
    Forward(String),
    Rejected(RejectReason),
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency Gauge
// ─────────────────────────────────────────────────────────────────────────────

/// Live per-agent call counts.
struct ConcurrencyGauge {
    counts: DashMap<String, Arc<AtomicUsize>>,
}

impl ConcurrencyGauge {
    fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    fn counter(&self, agent_id: &str) -> Arc<AtomicUsize> {
        Arc::clone(
            &self
                .counts
                .entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0))),
        )
    }

    /// Attempts to take a slot; `None` when the agent is at its maximum.
    fn acquire(&self, agent: &AgentConfig) -> Option<CallPermit> {
        let counter = self.counter(&agent.id);
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current >= agent.max_concurrent_calls {
                return None;
            }
            match counter.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(CallPermit {
                        agent_id: agent.id.clone(),
                        counter,
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    fn current(&self, agent_id: &str) -> usize {
        self.counts
            .get(agent_id)
            .map_or(0, |c| c.load(Ordering::Acquire))
    }
}

/// RAII concurrency slot for one call on one agent.
pub struct CallPermit {
    agent_id: String,
    counter: Arc<AtomicUsize>,
}

impl CallPermit {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing Table
// ─────────────────────────────────────────────────────────────────────────────

/// Shared routing state: swap-whole snapshots plus the live gauge.
pub struct RoutingTable {
    snapshot: RwLock<Arc<RoutingSnapshot>>,
    gauge: ConcurrencyGauge,
}

impl RoutingTable {
    pub fn new(snapshot: RoutingSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            gauge: ConcurrencyGauge::new(),
        }
    }

    /// Current snapshot; cheap Arc clone.
    pub fn load(&self) -> Arc<RoutingSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Replaces the whole snapshot atomically.
    pub fn replace(&self, snapshot: RoutingSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Enables or disables one agent by building a new snapshot generation.
    ///
    /// Returns `false` when the agent does not exist.
    pub fn set_agent_active(&self, agent_id: &str, active: bool) -> bool {
        let current = self.load();
        if current.agent(agent_id).is_none() {
            return false;
        }
        let agents = current
            .agents
            .iter()
            .map(|a| {
                if a.id == agent_id {
                    let mut updated = (**a).clone();
                    updated.active = active;
                    Arc::new(updated)
                } else {
                    Arc::clone(a)
                }
            })
            .collect();
        self.replace(RoutingSnapshot {
            agents,
            number_map: current.number_map.clone(),
            dnc: current.dnc.clone(),
        });
        log::info!("[Routing] Agent {} set active={}", agent_id, active);
        true
    }

    /// Current live call count for an agent.
    pub fn active_calls(&self, agent_id: &str) -> usize {
        self.gauge.current(agent_id)
    }

    /// Resolves a call to an agent, a forward target, or a rejection.
    ///
    /// Evaluation order is fixed: DNC first, then the admissible-agent set
    /// (direction policy + business hours), then the number mapping
    /// (longest prefix wins), then the tenant's primary agent, then the
    /// oldest agent. Forward routing and the concurrency ceiling apply to
    /// whichever agent was chosen.
    pub fn resolve(
        &self,
        direction: CallDirection,
        to: &str,
        from: &str,
        now: DateTime<Utc>,
    ) -> Resolution {
        let snapshot = self.load();

        if snapshot.dnc.contains(from) {
            log::info!("[Routing] Refusing {}: on do-not-call set", from);
            return Resolution::Rejected(RejectReason::DncBlock);
        }

        let admissible: Vec<&Arc<AgentConfig>> = snapshot
            .agents
            .iter()
            .filter(|a| a.active && a.direction_policy.admits(direction) && a.hours.contains(now))
            .collect();

        if admissible.is_empty() {
            return Resolution::Rejected(RejectReason::NoAgentAvailable);
        }

        let mapped = snapshot
            .number_map
            .iter()
            .filter(|m| to.starts_with(&m.prefix))
            .filter(|m| admissible.iter().any(|a| a.id == m.agent_id))
            .max_by_key(|m| m.prefix.len())
            .and_then(|m| snapshot.agent(&m.agent_id));

        let chosen = mapped
            .or_else(|| admissible.iter().find(|a| a.primary).copied())
            .or_else(|| admissible.iter().min_by_key(|a| a.created_at).copied());

        let Some(agent) = chosen else {
            return Resolution::Rejected(RejectReason::NoAgentAvailable);
        };

        if agent.routing == RoutingType::Forward {
            if let Some(target) = &agent.forward_to {
                return Resolution::Forward(target.clone());
            }
            // Validated configurations cannot reach this; treat a missing
            // target as no agent rather than a broken bridge.
            return Resolution::Rejected(RejectReason::NoAgentAvailable);
        }

        match self.gauge.acquire(agent) {
            Some(permit) => Resolution::Agent(Arc::clone(agent), permit),
            None => Resolution::Rejected(RejectReason::Overloaded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionConfig;
    use crate::routing::agent::DirectionPolicy;

    fn session() -> SessionConfig {
        SessionConfig::builder()
            .model("gemini-2.0-flash-live-001")
            .voice("Puck")
            .language("en-US")
            .system_prompt("Answer calls.")
            .build()
            .unwrap()
    }

    fn agent(id: &str) -> AgentConfig {
        AgentConfig::direct(id, id, session())
    }

    fn table_with(agents: Vec<AgentConfig>) -> RoutingTable {
        RoutingTable::new(RoutingSnapshot {
            agents: agents.into_iter().map(Arc::new).collect(),
            number_map: vec![],
            dnc: HashSet::new(),
        })
    }

    #[test]
    fn dnc_blocks_before_everything_else() {
        let mut snapshot = RoutingSnapshot {
            agents: vec![Arc::new(agent("a1"))],
            number_map: vec![],
            dnc: HashSet::new(),
        };
        snapshot.dnc.insert("+15550009999".to_string());
        let table = RoutingTable::new(snapshot);

        let resolution = table.resolve(
            CallDirection::Inbound,
            "+15550002222",
            "+15550009999",
            Utc::now(),
        );
        assert!(matches!(
            resolution,
            Resolution::Rejected(RejectReason::DncBlock)
        ));
    }

    #[test]
    fn no_agents_rejects_with_missing_agent() {
        let table = table_with(vec![]);
        let resolution = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        assert!(matches!(
            resolution,
            Resolution::Rejected(RejectReason::NoAgentAvailable)
        ));
    }

    #[test]
    fn direction_policy_filters_agents() {
        let mut outbound_only = agent("a1");
        outbound_only.direction_policy = DirectionPolicy::Outbound;
        let table = table_with(vec![outbound_only]);

        let resolution = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        assert!(matches!(
            resolution,
            Resolution::Rejected(RejectReason::NoAgentAvailable)
        ));

        let resolution = table.resolve(CallDirection::Outbound, "+1", "+2", Utc::now());
        assert!(matches!(resolution, Resolution::Agent(a, _) if a.id == "a1"));
    }

    #[test]
    fn longest_prefix_mapping_wins() {
        let table = RoutingTable::new(RoutingSnapshot {
            agents: vec![Arc::new(agent("general")), Arc::new(agent("specific"))],
            number_map: vec![
                NumberMapping {
                    prefix: "+1555".to_string(),
                    agent_id: "general".to_string(),
                },
                NumberMapping {
                    prefix: "+1555000".to_string(),
                    agent_id: "specific".to_string(),
                },
            ],
            dnc: HashSet::new(),
        });

        let resolution = table.resolve(CallDirection::Inbound, "+15550002222", "+2", Utc::now());
        assert!(matches!(resolution, Resolution::Agent(a, _) if a.id == "specific"));
    }

    #[test]
    fn primary_beats_creation_order() {
        let mut older = agent("older");
        older.created_at = Utc::now() - chrono::Duration::days(30);
        let mut preferred = agent("preferred");
        preferred.primary = true;

        let table = table_with(vec![older, preferred]);
        let resolution = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        assert!(matches!(resolution, Resolution::Agent(a, _) if a.id == "preferred"));
    }

    #[test]
    fn oldest_agent_is_fallback() {
        let mut older = agent("older");
        older.created_at = Utc::now() - chrono::Duration::days(30);
        let newer = agent("newer");

        let table = table_with(vec![newer, older]);
        let resolution = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        assert!(matches!(resolution, Resolution::Agent(a, _) if a.id == "older"));
    }

    #[test]
    fn forward_agent_returns_target() {
        let mut forwarder = agent("fwd");
        forwarder.routing = RoutingType::Forward;
        forwarder.forward_to = Some("+15550007777".to_string());

        let table = table_with(vec![forwarder]);
        let resolution = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        let Resolution::Forward(target) = resolution else {
            panic!("expected forward");
        };
        assert_eq!(target, "+15550007777");
    }

    #[test]
    fn concurrency_ceiling_rejects_overloaded() {
        let mut limited = agent("a1");
        limited.max_concurrent_calls = 2;
        let table = table_with(vec![limited]);

        let r1 = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        let r2 = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        let Resolution::Agent(_, _p1) = r1 else {
            panic!("first call should resolve")
        };
        let Resolution::Agent(_, _p2) = r2 else {
            panic!("second call should resolve")
        };
        assert_eq!(table.active_calls("a1"), 2);

        let r3 = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        assert!(matches!(r3, Resolution::Rejected(RejectReason::Overloaded)));
    }

    #[test]
    fn dropping_permit_frees_slot() {
        let mut limited = agent("a1");
        limited.max_concurrent_calls = 1;
        let table = table_with(vec![limited]);

        let r1 = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        let Resolution::Agent(_, permit) = r1 else {
            panic!("should resolve")
        };
        drop(permit);
        assert_eq!(table.active_calls("a1"), 0);

        let r2 = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        assert!(matches!(r2, Resolution::Agent(_, _)));
    }

    #[test]
    fn toggle_agent_swaps_snapshot() {
        let table = table_with(vec![agent("a1")]);
        assert!(table.set_agent_active("a1", false));

        let resolution = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        assert!(matches!(
            resolution,
            Resolution::Rejected(RejectReason::NoAgentAvailable)
        ));

        assert!(table.set_agent_active("a1", true));
        let resolution = table.resolve(CallDirection::Inbound, "+1", "+2", Utc::now());
        assert!(matches!(resolution, Resolution::Agent(_, _)));

        assert!(!table.set_agent_active("ghost", true));
    }
}
