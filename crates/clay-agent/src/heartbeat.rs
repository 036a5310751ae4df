//! Heartbeat task.
//!
//! Emits a heartbeat on a fixed cadence while the connection is up. The
//! connected flag is owned by the connection loop; when it is down the
//! task idles on the shorter reconnect cadence so the first heartbeat
//! lands soon after a reconnect.

use crate::Outbox;
use clay_protocol::{AgentEvent, epoch_secs};
use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub struct Heartbeat {
    outbox: Outbox,
    connected: Arc<AtomicBool>,
    interval: Duration,
    reconnect_delay: Duration,
}

impl Heartbeat {
    pub fn new(
        outbox: Outbox,
        connected: Arc<AtomicBool>,
        interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            outbox,
            connected,
            interval,
            reconnect_delay,
        }
    }

    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Heartbeat task started (interval {:?})", self.interval);
            loop {
                let wait = if self.connected.load(Ordering::Relaxed) {
                    match self
                        .outbox
                        .send(AgentEvent::Heartbeat {
                            timestamp: epoch_secs(),
                        })
                        .await
                    {
                        Ok(()) => self.interval,
                        Err(_) => {
                            debug!("Outbox closed, heartbeat idling");
                            self.reconnect_delay
                        }
                    }
                } else {
                    self.reconnect_delay
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.recv() => break,
                }
            }
            info!("Heartbeat task stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn heartbeats_flow_while_connected() {
        let (tx, mut rx) = mpsc::channel(16);
        let connected = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = Heartbeat::new(
            tx,
            connected,
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .spawn(shutdown_rx);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, AgentEvent::Heartbeat { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, AgentEvent::Heartbeat { .. }));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn no_heartbeats_while_disconnected() {
        let (tx, mut rx) = mpsc::channel(16);
        let connected = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = Heartbeat::new(
            tx,
            connected,
            Duration::from_millis(5),
            Duration::from_millis(5),
        )
        .spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
