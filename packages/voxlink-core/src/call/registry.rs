//! Live-call registry.
//!
//! Every orchestrator registers its call here for the call's lifetime. The
//! registry answers two operational questions: what is on the bridge right
//! now (call identity, age, agent - surfaced by the health endpoint), and
//! how to make it all stop (shutdown cancels every registered call's token
//! within the cancellation grace period).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::carrier::StartInfo;

/// One registered call.
struct ActiveCall {
    started_at: DateTime<Utc>,
    /// Carrier identity; empty until the start frame resolves.
    identity: RwLock<Option<StartInfo>>,
    agent_id: RwLock<Option<String>>,
    cancel: CancellationToken,
}

/// Registry of calls currently on the bridge.
pub struct CallRegistry {
    calls: DashMap<Uuid, Arc<ActiveCall>>,
    /// Parent of every per-call token. Replaced after stop_all() so new
    /// calls keep being accepted.
    shutdown: RwLock<CancellationToken>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
            shutdown: RwLock::new(CancellationToken::new()),
        }
    }

    /// Issues a call-scoped cancellation token, child of the registry's
    /// shutdown token. The listener creates one per accepted connection.
    pub fn issue_token(&self) -> CancellationToken {
        self.shutdown.read().child_token()
    }

    /// Registers a call. The guard unregisters it however the call ends.
    pub fn register(
        self: &Arc<Self>,
        call_id: Uuid,
        cancel: CancellationToken,
    ) -> CallRegistration {
        let entry = Arc::new(ActiveCall {
            started_at: Utc::now(),
            identity: RwLock::new(None),
            agent_id: RwLock::new(None),
            cancel,
        });
        self.calls.insert(call_id, entry);
        log::debug!(
            "[Registry] Call {} registered (active: {})",
            call_id,
            self.calls.len()
        );
        CallRegistration {
            call_id,
            registry: Arc::clone(self),
        }
    }

    /// Records the carrier identity once the start frame resolves.
    pub fn record_start(&self, call_id: Uuid, info: &StartInfo) {
        if let Some(entry) = self.calls.get(&call_id) {
            *entry.identity.write() = Some(info.clone());
        }
    }

    /// Records the agent the call was routed to.
    pub fn record_agent(&self, call_id: Uuid, agent_id: &str) {
        if let Some(entry) = self.calls.get(&call_id) {
            *entry.agent_id.write() = Some(agent_id.to_string());
        }
    }

    /// Number of calls currently on the bridge.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.calls.len()
    }

    /// JSON listing of live calls for the health endpoint.
    pub fn snapshot(&self) -> serde_json::Value {
        let now = Utc::now();
        let calls: Vec<serde_json::Value> = self
            .calls
            .iter()
            .map(|entry| {
                let identity = entry.identity.read();
                json!({
                    "callId": entry.key(),
                    "ageSecs": (now - entry.started_at).num_seconds().max(0),
                    "agentId": *entry.agent_id.read(),
                    "streamId": identity.as_ref().map(|i| i.stream_id.clone()),
                    "direction": identity.as_ref().map(|i| i.direction.as_str()),
                    "from": identity.as_ref().map(|i| i.from.clone()),
                    "to": identity.as_ref().map(|i| i.to.clone()),
                })
            })
            .collect();
        json!(calls)
    }

    /// Cancels every registered call's token, then installs a fresh shutdown
    /// parent so the listener can keep accepting. Returns how many calls
    /// were signalled.
    pub fn stop_all(&self) -> usize {
        let count = self.calls.len();
        if count > 0 {
            log::info!("[Registry] Stopping {} live call(s)", count);
        }
        for entry in self.calls.iter() {
            entry.cancel.cancel();
        }
        // Tokens issued before this point may not be registered yet; cancel
        // their parent too so half-accepted connections also unwind.
        let mut shutdown = self.shutdown.write();
        shutdown.cancel();
        *shutdown = CancellationToken::new();
        count
    }

    fn unregister(&self, call_id: Uuid) {
        if self.calls.remove(&call_id).is_some() {
            log::debug!(
                "[Registry] Call {} unregistered (active: {})",
                call_id,
                self.calls.len()
            );
        }
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII registration; removes the call from the registry on drop.
pub struct CallRegistration {
    call_id: Uuid,
    registry: Arc<CallRegistry>,
}

impl Drop for CallRegistration {
    fn drop(&mut self) {
        self.registry.unregister(self.call_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallDirection;

    fn start_info() -> StartInfo {
        StartInfo {
            stream_id: "S1".into(),
            call_id: "C1".into(),
            direction: CallDirection::Inbound,
            from: "+15550001111".into(),
            to: "+15550002222".into(),
        }
    }

    #[test]
    fn register_and_drop_updates_count() {
        let registry = Arc::new(CallRegistry::new());
        assert_eq!(registry.active_count(), 0);

        let id = Uuid::new_v4();
        let registration = registry.register(id, registry.issue_token());
        assert_eq!(registry.active_count(), 1);

        drop(registration);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn snapshot_carries_call_identity() {
        let registry = Arc::new(CallRegistry::new());
        let id = Uuid::new_v4();
        let _registration = registry.register(id, registry.issue_token());

        // Before the start frame: registered but anonymous
        let listing = registry.snapshot();
        assert_eq!(listing[0]["callId"], json!(id));
        assert_eq!(listing[0]["streamId"], json!(null));

        registry.record_start(id, &start_info());
        registry.record_agent(id, "front-desk");

        let listing = registry.snapshot();
        assert_eq!(listing[0]["streamId"], "S1");
        assert_eq!(listing[0]["direction"], "inbound");
        assert_eq!(listing[0]["from"], "+15550001111");
        assert_eq!(listing[0]["to"], "+15550002222");
        assert_eq!(listing[0]["agentId"], "front-desk");
    }

    #[test]
    fn stop_all_cancels_registered_tokens() {
        let registry = Arc::new(CallRegistry::new());
        let token = registry.issue_token();
        let _registration = registry.register(Uuid::new_v4(), token.clone());
        assert!(!token.is_cancelled());

        assert_eq!(registry.stop_all(), 1);
        assert!(token.is_cancelled());

        // Fresh parent: new calls get live tokens
        let next = registry.issue_token();
        assert!(!next.is_cancelled());
    }

    #[test]
    fn stop_all_reaches_unregistered_tokens_via_parent() {
        let registry = Arc::new(CallRegistry::new());
        // Token issued for an accepted connection whose call hasn't
        // registered yet
        let early = registry.issue_token();

        registry.stop_all();
        assert!(early.is_cancelled());
    }

    #[test]
    fn record_start_for_unknown_call_is_ignored() {
        let registry = Arc::new(CallRegistry::new());
        registry.record_start(Uuid::new_v4(), &start_info());
        assert!(registry.snapshot().as_array().unwrap().is_empty());
    }
}
