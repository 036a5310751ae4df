//! Timeout sweeper: evicts sessions that have gone silent.
//!
//! Runs as an independent background task sharing only the registry's
//! synchronized access path with the connection handlers. It never blocks
//! relay dispatch.

use crate::hub::RelayHub;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Spawn the sweeper loop. It runs until a shutdown signal arrives.
pub fn spawn(hub: Arc<RelayHub>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = hub.timeouts().check_interval;
        info!("Timeout sweeper started (period: {:?})", period);

        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; skip it so a fresh hub
        // does not sweep before any session had a chance to heartbeat.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep(&hub).await;
                }
                _ = shutdown.recv() => {
                    info!("Timeout sweeper stopping");
                    break;
                }
            }
        }
    })
}

/// One sweep pass: evict expired sessions and broadcast the refreshed
/// list once if anything was evicted.
pub async fn sweep(hub: &RelayHub) {
    let timeouts = hub.timeouts();

    // Hostnames are gone once evicted; snapshot them first for the log.
    let hostnames: HashMap<String, String> = hub
        .registry()
        .list()
        .into_iter()
        .map(|s| (s.id, s.hostname))
        .collect();

    let evicted = hub.registry().evict_expired(
        Instant::now(),
        timeouts.base_timeout,
        timeouts.media_multiplier,
    );

    if evicted.is_empty() {
        debug!("Sweep: no expired sessions");
        return;
    }

    // The connection outbox stays registered: if the socket is somehow
    // still alive, the next heartbeat gets a request_register reply. A
    // truly dead connection is cleaned up by its own teardown path.
    for id in &evicted {
        warn!(
            "Session timed out: {} ({})",
            id,
            hostnames.get(id).map(String::as_str).unwrap_or("unknown")
        );
    }

    hub.broadcast_client_list().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use crate::hub::CONNECTION_BUFFER_SIZE;
    use clay_protocol::HubEvent;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sweep_evicts_nothing_on_fresh_sessions() {
        let hub = RelayHub::new(TimeoutConfig::default());
        hub.registry().add("fresh", "addr");

        sweep(&hub).await;
        assert_eq!(hub.registry().len(), 1);
    }

    #[tokio::test]
    async fn sweep_broadcasts_once_after_eviction() {
        let hub = RelayHub::new(TimeoutConfig {
            base_timeout: Duration::from_secs(0),
            ..TimeoutConfig::default()
        });
        hub.registry().add("stale-1", "addr");
        hub.registry().add("stale-2", "addr");
        // Let both sessions pass the zero-second timeout.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (tx, mut rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        hub.register_observer("o1", tx);

        sweep(&hub).await;

        assert_eq!(hub.registry().len(), 0);
        // Exactly one list broadcast for the whole evicted set.
        match rx.recv().await {
            Some(HubEvent::UpdateClientList { clients }) => assert!(clients.is_empty()),
            other => panic!("expected update_client_list, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
