//! Wire types for the Clay relay protocol.
//!
//! These types define the event protocol spoken over the persistent
//! WebSocket connections between agents, the hub, and observer consoles.
//! Every message is a JSON object tagged with a `type` field, so the two
//! directions of each connection can be parsed independently.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Header carrying the connection-type marker on the WebSocket upgrade.
pub const CLIENT_TYPE_HEADER: &str = "x-clay-client-type";

/// Marker value identifying an agent connection. Anything else (including
/// a missing header) is treated as an observer console.
pub const AGENT_CLIENT_TYPE: &str = "clay-agent";

/// Current wall-clock time as fractional epoch seconds.
///
/// Timestamps travel the wire as `f64` epoch seconds; sub-second precision
/// is enough for presentation and the hub never compares wire timestamps
/// for correctness.
pub fn epoch_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Snapshot of one live agent session as the hub sees it.
///
/// All timestamps are epoch seconds. `last_screen` is zero until the first
/// screen frame arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub address: String,
    pub hostname: String,
    pub os: String,
    pub last_seen: f64,
    pub connected_at: f64,
    pub screen_active: bool,
    pub webcam_active: bool,
    pub last_screen: f64,
}

/// Events sent from an agent to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Identify the machine behind this connection.
    Register { hostname: String, os: String },

    /// Liveness signal. The timestamp is the agent's local clock.
    Heartbeat { timestamp: f64 },

    /// A chunk of terminal output produced by command execution.
    TerminalOutput { output: String },

    /// One camera frame, base64-encoded JPEG.
    WebcamFrame { image_data: String, timestamp: f64 },

    /// One screen frame, base64-encoded JPEG.
    ScreenFrame {
        image_data: String,
        timestamp: f64,
        width: u32,
        height: u32,
    },

    /// Outcome of a non-streaming command (lock, capture, ...).
    CommandResult {
        command: String,
        success: bool,
        message: String,
    },

    /// The agent's shell prompt changed (usually after `cd`).
    TerminalPromptUpdate { prompt: String, full_path: String },
}

/// Commands sent from an observer console to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverCommand {
    /// Run a command on a specific agent.
    ExecuteCommand { client_id: String, command: String },

    /// Best-effort interrupt of whatever the agent is running.
    InterruptCommand { client_id: String },

    /// Ask for the current session list (unicast reply).
    GetClients,
}

/// Events sent from the hub to a connection (agent or observer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    // ========== Observer-facing ==========
    /// Full session list, broadcast on any membership or registration change.
    UpdateClientList { clients: Vec<SessionSnapshot> },

    /// Relayed terminal output, annotated with the originating session.
    TerminalOutput {
        client_id: String,
        output: String,
        timestamp: f64,
    },

    /// Relayed camera frame.
    WebcamFrame {
        client_id: String,
        image_data: String,
        timestamp: f64,
    },

    /// Relayed screen frame.
    ScreenFrame {
        client_id: String,
        image_data: String,
        timestamp: f64,
        width: u32,
        height: u32,
    },

    /// Relayed command outcome.
    CommandResult {
        client_id: String,
        command: String,
        success: bool,
        message: String,
        timestamp: f64,
    },

    /// Relayed prompt update.
    TerminalPromptUpdate {
        client_id: String,
        prompt: String,
        full_path: String,
    },

    /// Confirmation to the sender that a command was forwarded.
    CommandSent {
        client_id: String,
        command: String,
        timestamp: f64,
    },

    /// Command routing failure, unicast to the requesting observer only.
    CommandError { message: String },

    /// Connection-level processing failure.
    ConnectionError { message: String },

    // ========== Agent-facing ==========
    /// Server clock sync, sent once on connect.
    ServerTime { timestamp: f64 },

    /// Registration accepted.
    RegistrationSuccess { message: String },

    /// Registration rejected (session unknown to the registry).
    RegistrationFailed { message: String },

    /// The hub does not know this session; the agent should re-register.
    RequestRegister { reason: String },

    /// Throttled heartbeat acknowledgement.
    HeartbeatAck { timestamp: f64 },

    /// A command forwarded from an observer. `sender` is the observer's
    /// connection id so results can be attributed.
    ExecuteCommand { command: String, sender: String },

    /// Best-effort interrupt signal forwarded from an observer.
    InterruptCommand { sender: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_event_tags_match_wire_names() {
        let ev = AgentEvent::Register {
            hostname: "h1".to_string(),
            os: "Linux 6.1".to_string(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"register\""));
        assert!(json.contains("\"hostname\":\"h1\""));

        let ev = AgentEvent::ScreenFrame {
            image_data: "AAAA".to_string(),
            timestamp: 1.5,
            width: 800,
            height: 600,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"screen_frame\""));
        assert!(json.contains("\"width\":800"));
    }

    #[test]
    fn observer_command_parses_from_wire_json() {
        let cmd: ObserverCommand = serde_json::from_str(
            r#"{"type":"execute_command","client_id":"abc","command":"echo hi"}"#,
        )
        .unwrap();
        match cmd {
            ObserverCommand::ExecuteCommand { client_id, command } => {
                assert_eq!(client_id, "abc");
                assert_eq!(command, "echo hi");
            }
            other => panic!("unexpected variant: {:?}", other),
        }

        let cmd: ObserverCommand = serde_json::from_str(r#"{"type":"get_clients"}"#).unwrap();
        assert!(matches!(cmd, ObserverCommand::GetClients));
    }

    #[test]
    fn hub_event_roundtrip() {
        let ev = HubEvent::CommandSent {
            client_id: "c1".to_string(),
            command: "ls".to_string(),
            timestamp: 99.25,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"command_sent\""));
        let back: HubEvent = serde_json::from_str(&json).unwrap();
        match back {
            HubEvent::CommandSent {
                client_id, command, ..
            } => {
                assert_eq!(client_id, "c1");
                assert_eq!(command, "ls");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn session_snapshot_field_names() {
        let snap = SessionSnapshot {
            id: "s".to_string(),
            address: "127.0.0.1".to_string(),
            hostname: "unknown".to_string(),
            os: "unknown".to_string(),
            last_seen: 1.0,
            connected_at: 1.0,
            screen_active: false,
            webcam_active: false,
            last_screen: 0.0,
        };
        let json = serde_json::to_string(&snap).unwrap();
        for field in [
            "\"id\"",
            "\"address\"",
            "\"hostname\"",
            "\"os\"",
            "\"last_seen\"",
            "\"connected_at\"",
            "\"screen_active\"",
            "\"webcam_active\"",
            "\"last_screen\"",
        ] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
    }

    #[test]
    fn epoch_secs_is_recent() {
        let t = epoch_secs();
        // Sanity: after 2020, before 2100.
        assert!(t > 1_577_836_800.0);
        assert!(t < 4_102_444_800.0);
    }
}
