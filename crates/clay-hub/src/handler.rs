//! Per-connection event dispatch.
//!
//! Connections are classified once at connect time (agent or observer) and
//! every inbound event is routed through one of the handlers here. Each
//! handler arm recovers its own failures: a bad event gets a log line and,
//! where the protocol defines one, a best-effort error reply. Nothing in
//! this module propagates an error up into the socket loop.

use crate::error::HubError;
use crate::hub::{EventSender, RelayHub};
use crate::registry::MediaKind;
use clay_protocol::{AgentEvent, HubEvent, ObserverCommand, epoch_secs};
use log::{debug, error, info, warn};

/// Connection classification, fixed for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Agent,
    Observer,
}

/// A new agent connection: create its session, sync the server clock to
/// it and tell every observer about the new member.
pub async fn on_agent_connect(hub: &RelayHub, id: &str, address: &str, tx: EventSender) {
    info!("Agent connected: id={}, address={}", id, address);
    hub.register_agent(id, tx);
    hub.registry().add(id, address);
    hub.broadcast_client_list().await;

    if let Err(e) = hub
        .send_to_agent(
            id,
            HubEvent::ServerTime {
                timestamp: epoch_secs(),
            },
        )
        .await
    {
        warn!("Failed to send server time to {}: {}", id, e);
    }
}

/// A new observer connection: join the broadcast group and send it the
/// current session list (unicast, not broadcast).
pub async fn on_observer_connect(hub: &RelayHub, id: &str, address: &str, tx: EventSender) {
    info!("Observer connected: id={}, address={}", id, address);
    hub.register_observer(id, tx);

    let clients = hub.registry().list();
    if let Err(e) = hub
        .send_to_observer(id, HubEvent::UpdateClientList { clients })
        .await
    {
        warn!("Failed to send initial client list to {}: {}", id, e);
    }
}

/// Connection teardown. Unknown-agent disconnects are logged, not errors:
/// the sweeper may have evicted the session already.
pub async fn on_disconnect(hub: &RelayHub, id: &str, role: ConnectionRole) {
    match role {
        ConnectionRole::Agent => {
            let hostname = hub.registry().get(id).map(|s| s.hostname);
            hub.unregister_agent(id);
            if hub.registry().remove(id) {
                info!(
                    "Agent disconnected: id={}, hostname={}",
                    id,
                    hostname.as_deref().unwrap_or("unknown")
                );
                hub.broadcast_client_list().await;
            } else {
                warn!("Unknown agent disconnected: id={}", id);
            }
        }
        ConnectionRole::Observer => {
            hub.unregister_observer(id);
            info!("Observer disconnected: id={}", id);
        }
    }
}

/// Dispatch one event from an agent connection.
pub async fn on_agent_event(hub: &RelayHub, id: &str, event: AgentEvent) {
    match event {
        AgentEvent::Register { hostname, os } => handle_register(hub, id, hostname, os).await,
        AgentEvent::Heartbeat { .. } => handle_heartbeat(hub, id).await,
        AgentEvent::TerminalOutput { output } => handle_terminal_output(hub, id, output).await,
        AgentEvent::WebcamFrame {
            image_data,
            timestamp,
        } => {
            handle_media_frame(hub, id, MediaKind::Webcam, image_data, timestamp, None).await;
        }
        AgentEvent::ScreenFrame {
            image_data,
            timestamp,
            width,
            height,
        } => {
            handle_media_frame(
                hub,
                id,
                MediaKind::Screen,
                image_data,
                timestamp,
                Some((width, height)),
            )
            .await;
        }
        AgentEvent::CommandResult {
            command,
            success,
            message,
        } => {
            hub.registry().touch(id);
            hub.broadcast_to_observers(HubEvent::CommandResult {
                client_id: id.to_string(),
                command,
                success,
                message,
                timestamp: epoch_secs(),
            })
            .await;
        }
        AgentEvent::TerminalPromptUpdate { prompt, full_path } => {
            hub.registry().touch(id);
            hub.broadcast_to_observers(HubEvent::TerminalPromptUpdate {
                client_id: id.to_string(),
                prompt,
                full_path,
            })
            .await;
        }
    }
}

/// Dispatch one command from an observer connection.
pub async fn on_observer_command(hub: &RelayHub, id: &str, command: ObserverCommand) {
    match command {
        ObserverCommand::ExecuteCommand { client_id, command } => {
            handle_execute_command(hub, id, client_id, command).await;
        }
        ObserverCommand::InterruptCommand { client_id } => {
            handle_interrupt_command(hub, id, client_id).await;
        }
        ObserverCommand::GetClients => {
            let clients = hub.registry().list();
            if let Err(e) = hub
                .send_to_observer(id, HubEvent::UpdateClientList { clients })
                .await
            {
                warn!("Failed to answer get_clients from {}: {}", id, e);
            }
        }
    }
}

async fn handle_register(hub: &RelayHub, id: &str, hostname: String, os: String) {
    // A register can race a disconnect that already tore the session down.
    if !hub.registry().update_info(id, &hostname, &os) {
        warn!("Invalid registration attempt: session {} not connected", id);
        let reply = HubEvent::RegistrationFailed {
            message: "invalid agent connection".to_string(),
        };
        if let Err(e) = hub.send_to_agent(id, reply).await {
            debug!("Could not deliver registration_failed to {}: {}", id, e);
        }
        return;
    }

    info!(
        "Agent registered: id={}, hostname={}, os={}",
        id, hostname, os
    );
    hub.broadcast_client_list().await;
    let reply = HubEvent::RegistrationSuccess {
        message: "registration complete".to_string(),
    };
    if let Err(e) = hub.send_to_agent(id, reply).await {
        warn!("Could not deliver registration_success to {}: {}", id, e);
    }
}

async fn handle_heartbeat(hub: &RelayHub, id: &str) {
    if hub.registry().touch(id) {
        // The ack is telemetry, not a correctness mechanism; throttle it.
        if hub.should_ack_heartbeat(id) {
            let ack = HubEvent::HeartbeatAck {
                timestamp: epoch_secs(),
            };
            if let Err(e) = hub.send_to_agent(id, ack).await {
                debug!("Could not deliver heartbeat_ack to {}: {}", id, e);
            }
        }
    } else {
        warn!("Heartbeat from unknown session {}, requesting re-register", id);
        let reply = HubEvent::RequestRegister {
            reason: "session not registered".to_string(),
        };
        if let Err(e) = hub.send_to_agent(id, reply).await {
            debug!("Could not deliver request_register to {}: {}", id, e);
        }
    }
}

async fn handle_terminal_output(hub: &RelayHub, id: &str, output: String) {
    if output.is_empty() {
        warn!("Empty terminal output from {}", id);
        return;
    }
    hub.registry().touch(id);
    hub.broadcast_to_observers(HubEvent::TerminalOutput {
        client_id: id.to_string(),
        output,
        timestamp: epoch_secs(),
    })
    .await;
}

async fn handle_media_frame(
    hub: &RelayHub,
    id: &str,
    kind: MediaKind,
    image_data: String,
    timestamp: f64,
    dimensions: Option<(u32, u32)>,
) {
    if image_data.is_empty() {
        warn!("Empty {:?} frame from {}", kind, id);
        return;
    }

    // Any inbound agent event counts as liveness.
    hub.registry().touch(id);
    hub.registry().set_media_active(id, kind, true);

    if let Err(e) = relay_media_frame(hub, id, kind, image_data, timestamp, dimensions).await {
        // Clear the activity flag before surfacing the failure so the
        // sweeper stops extending this session's timeout.
        hub.registry().set_media_active(id, kind, false);
        error!("Failed to relay {:?} frame from {}: {}", kind, id, e);
    }
}

async fn relay_media_frame(
    hub: &RelayHub,
    id: &str,
    kind: MediaKind,
    image_data: String,
    timestamp: f64,
    dimensions: Option<(u32, u32)>,
) -> Result<(), HubError> {
    let event = match kind {
        MediaKind::Webcam => HubEvent::WebcamFrame {
            client_id: id.to_string(),
            image_data,
            timestamp,
        },
        MediaKind::Screen => {
            let (width, height) = dimensions.ok_or_else(|| {
                HubError::InvalidPayload("screen frame without dimensions".to_string())
            })?;
            HubEvent::ScreenFrame {
                client_id: id.to_string(),
                image_data,
                timestamp,
                width,
                height,
            }
        }
    };
    hub.broadcast_to_observers(event).await;
    Ok(())
}

async fn handle_execute_command(
    hub: &RelayHub,
    sender_id: &str,
    target_id: String,
    command: String,
) {
    if target_id.is_empty() {
        let message = "no target client id specified".to_string();
        error!("Command routing error: {} (sender: {})", message, sender_id);
        reply_command_error(hub, sender_id, message).await;
        return;
    }

    if hub.registry().get(&target_id).is_none() {
        let message = format!("client {} does not exist or has disconnected", target_id);
        error!("Command routing error: {} (sender: {})", message, sender_id);
        reply_command_error(hub, sender_id, message).await;
        return;
    }

    info!(
        "Command routed to {}: {} (sender: {})",
        target_id, command, sender_id
    );

    let forward = HubEvent::ExecuteCommand {
        command: command.clone(),
        sender: sender_id.to_string(),
    };
    if let Err(e) = hub.send_to_agent(&target_id, forward).await {
        let message = format!("failed to deliver command to {}: {}", target_id, e);
        error!("Command routing error: {} (sender: {})", message, sender_id);
        reply_command_error(hub, sender_id, message).await;
        return;
    }

    let confirm = HubEvent::CommandSent {
        client_id: target_id,
        command,
        timestamp: epoch_secs(),
    };
    if let Err(e) = hub.send_to_observer(sender_id, confirm).await {
        warn!("Could not confirm command_sent to {}: {}", sender_id, e);
    }
}

async fn handle_interrupt_command(hub: &RelayHub, sender_id: &str, target_id: String) {
    // The protocol defines no reply path for interrupt failures; log only.
    if hub.registry().get(&target_id).is_none() {
        warn!(
            "Interrupt for unknown client {} (sender: {})",
            target_id, sender_id
        );
        return;
    }

    info!("Interrupt routed to {} (sender: {})", target_id, sender_id);
    let forward = HubEvent::InterruptCommand {
        sender: sender_id.to_string(),
    };
    if let Err(e) = hub.send_to_agent(&target_id, forward).await {
        warn!("Failed to deliver interrupt to {}: {}", target_id, e);
    }
}

async fn reply_command_error(hub: &RelayHub, sender_id: &str, message: String) {
    // Errors go to the requesting observer only, never the group.
    if let Err(e) = hub
        .send_to_observer(sender_id, HubEvent::CommandError { message })
        .await
    {
        warn!("Could not deliver command_error to {}: {}", sender_id, e);
    }
}
