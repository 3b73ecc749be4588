//! Operational control channel.
//!
//! Operators can stop calls out-of-band: per call, per agent, or for the
//! whole tenant. Commands fan out over a broadcast channel that every
//! orchestrator subscribes to; each orchestrator decides locally whether a
//! command addresses its call.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol_constants::CONTROL_CHANNEL_CAPACITY;

/// Addressing scope of an emergency stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopScope {
    /// Every active call.
    Tenant,
    /// Every call on one agent.
    Agent(String),
    /// One call.
    Call(Uuid),
}

/// Commands delivered to orchestrators.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    EmergencyStop(StopScope),
}

impl ControlCommand {
    /// True when this command addresses the given call.
    #[must_use]
    pub fn addresses(&self, call_id: Uuid, agent_id: Option<&str>) -> bool {
        match self {
            Self::EmergencyStop(StopScope::Tenant) => true,
            Self::EmergencyStop(StopScope::Agent(id)) => agent_id == Some(id.as_str()),
            Self::EmergencyStop(StopScope::Call(id)) => *id == call_id,
        }
    }
}

/// Fan-out handle for control commands.
#[derive(Clone)]
pub struct ControlChannel {
    tx: broadcast::Sender<ControlCommand>,
}

impl ControlChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CONTROL_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribes an orchestrator. Subscriptions made after a command was
    /// sent do not see it — control is for live calls only.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlCommand> {
        self.tx.subscribe()
    }

    /// Issues an emergency stop. Returns the number of live subscribers the
    /// command reached.
    pub fn emergency_stop(&self, scope: StopScope) -> usize {
        log::warn!("[Control] Emergency stop issued: {:?}", scope);
        self.tx
            .send(ControlCommand::EmergencyStop(scope))
            .map_or(0, |n| n)
    }
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_scope_addresses_everything() {
        let cmd = ControlCommand::EmergencyStop(StopScope::Tenant);
        assert!(cmd.addresses(Uuid::new_v4(), Some("a1")));
        assert!(cmd.addresses(Uuid::new_v4(), None));
    }

    #[test]
    fn agent_scope_matches_agent_only() {
        let cmd = ControlCommand::EmergencyStop(StopScope::Agent("a1".into()));
        assert!(cmd.addresses(Uuid::new_v4(), Some("a1")));
        assert!(!cmd.addresses(Uuid::new_v4(), Some("a2")));
        assert!(!cmd.addresses(Uuid::new_v4(), None));
    }

    #[test]
    fn call_scope_matches_exact_call() {
        let id = Uuid::new_v4();
        let cmd = ControlCommand::EmergencyStop(StopScope::Call(id));
        assert!(cmd.addresses(id, None));
        assert!(!cmd.addresses(Uuid::new_v4(), None));
    }

    #[tokio::test]
    async fn stop_reaches_subscribers() {
        let control = ControlChannel::new();
        let mut rx = control.subscribe();
        assert_eq!(control.emergency_stop(StopScope::Tenant), 1);

        let cmd = rx.recv().await.unwrap();
        assert!(matches!(
            cmd,
            ControlCommand::EmergencyStop(StopScope::Tenant)
        ));
    }

    #[test]
    fn stop_without_subscribers_reaches_zero() {
        let control = ControlChannel::new();
        assert_eq!(control.emergency_stop(StopScope::Tenant), 0);
    }
}
