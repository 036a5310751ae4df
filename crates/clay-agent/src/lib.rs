//! Clay agent daemon.
//!
//! The agent keeps a persistent WebSocket connection to the hub, identifies
//! its machine, heartbeats on a fixed cadence, streams screen frames while
//! monitoring is enabled, and executes shell commands forwarded by observer
//! consoles under a bounded process pool.

pub mod capture;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod heartbeat;
pub mod monitor;
pub mod system;

use clay_protocol::AgentEvent;
use tokio::sync::mpsc;

/// Capacity of the outbound event channel between the agent's tasks and
/// the single connection writer.
pub const OUTBOX_BUFFER_SIZE: usize = 256;

/// Sending half of the agent's outbound event channel. Every task that
/// produces wire traffic (heartbeat, monitor, executor) holds a clone.
pub type Outbox = mpsc::Sender<AgentEvent>;
