//! Connection hub: per-connection outboxes and the observer broadcast
//! group.
//!
//! Each WebSocket connection owns an mpsc outbox whose sender is parked
//! here under the connection id. Broadcasts to the observer group are
//! fire-and-forget; a failed send is logged and the connection's own read
//! loop is left to notice the teardown.

use crate::config::TimeoutConfig;
use crate::error::HubError;
use crate::registry::SessionRegistry;
use clay_protocol::HubEvent;
use dashmap::DashMap;
use log::{debug, warn};
use std::time::Instant;
use tokio::sync::mpsc;

/// Size of the per-connection send buffer.
pub const CONNECTION_BUFFER_SIZE: usize = 64;

/// A sender for hub events to a specific connection.
pub type EventSender = mpsc::Sender<HubEvent>;

/// Shared relay state: the session registry plus the live connection maps.
pub struct RelayHub {
    registry: SessionRegistry,
    /// Observer connection id -> outbox (the broadcast group).
    observers: DashMap<String, EventSender>,
    /// Agent connection id -> outbox, for targeted command routing.
    agents: DashMap<String, EventSender>,
    /// Last heartbeat-ack time per agent, for the ack throttle.
    ack_times: DashMap<String, Instant>,
    timeouts: TimeoutConfig,
}

impl RelayHub {
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            observers: DashMap::new(),
            agents: DashMap::new(),
            ack_times: DashMap::new(),
            timeouts,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    // ========================================================================
    // Connection membership
    // ========================================================================

    pub fn register_agent(&self, id: &str, tx: EventSender) {
        self.agents.insert(id.to_string(), tx);
        debug!("Agent connection registered: {}", id);
    }

    pub fn unregister_agent(&self, id: &str) {
        self.agents.remove(id);
        self.ack_times.remove(id);
        debug!("Agent connection unregistered: {}", id);
    }

    pub fn register_observer(&self, id: &str, tx: EventSender) {
        self.observers.insert(id.to_string(), tx);
        debug!("Observer joined broadcast group: {}", id);
    }

    pub fn unregister_observer(&self, id: &str) {
        self.observers.remove(id);
        debug!("Observer left broadcast group: {}", id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn agent_connected(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Unicast to a specific agent connection.
    pub async fn send_to_agent(&self, id: &str, event: HubEvent) -> Result<(), HubError> {
        let tx = self
            .agents
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HubError::UnknownSession(id.to_string()))?;
        tx.send(event)
            .await
            .map_err(|_| HubError::ConnectionGone(id.to_string()))
    }

    /// Unicast to a specific observer connection.
    pub async fn send_to_observer(&self, id: &str, event: HubEvent) -> Result<(), HubError> {
        let tx = self
            .observers
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HubError::ConnectionGone(id.to_string()))?;
        tx.send(event)
            .await
            .map_err(|_| HubError::ConnectionGone(id.to_string()))
    }

    /// Fire-and-forget broadcast to the observer group.
    pub async fn broadcast_to_observers(&self, event: HubEvent) {
        let targets: Vec<(String, EventSender)> = self
            .observers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (id, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                warn!("Failed to deliver broadcast to observer {}", id);
            }
        }
    }

    /// Broadcast the refreshed session list to the observer group once.
    pub async fn broadcast_client_list(&self) {
        let clients = self.registry.list();
        self.broadcast_to_observers(HubEvent::UpdateClientList { clients })
            .await;
    }

    /// Heartbeat-ack throttle: at most one ack per session per window.
    /// The first heartbeat after connect always gets an ack.
    pub fn should_ack_heartbeat(&self, id: &str) -> bool {
        let now = Instant::now();
        match self.ack_times.get_mut(id) {
            Some(mut last) => {
                if now.duration_since(*last) >= self.timeouts.heartbeat_ack {
                    *last = now;
                    true
                } else {
                    false
                }
            }
            None => {
                self.ack_times.insert(id.to_string(), now);
                true
            }
        }
    }
}
