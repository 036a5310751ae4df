//! Persistent hub connection.
//!
//! One task owns the WebSocket: it drains the shared outbox into the
//! socket and dispatches inbound hub events to the executor and monitor.
//! On any transport failure the session ends, monitoring stops, and the
//! loop reconnects after a fixed delay, forever.

use crate::commands::CommandHandler;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::executor::CommandExecutor;
use crate::monitor::ScreenMonitor;
use crate::system::host_info;
use clay_protocol::{AGENT_CLIENT_TYPE, AgentEvent, CLIENT_TYPE_HEADER, HubEvent};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Shared handles the connection task needs to react to hub events.
pub struct AgentRuntime {
    pub connected: Arc<AtomicBool>,
    pub executor: Arc<CommandExecutor>,
    pub monitor: Arc<ScreenMonitor>,
    pub handler: Arc<CommandHandler>,
}

/// Connect-and-retry loop. Returns only on shutdown.
pub async fn run(
    config: AgentConfig,
    runtime: AgentRuntime,
    mut outbox_rx: mpsc::Receiver<AgentEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            res = connect_once(&config, &runtime, &mut outbox_rx) => match res {
                Ok(()) => info!("Connection closed by server"),
                Err(e) => warn!("Connection error: {}", e),
            },
        }

        runtime.connected.store(false, Ordering::SeqCst);
        if runtime.monitor.is_running() {
            // The hub forgot this session; frames would go nowhere.
            let _ = runtime.monitor.stop().await;
        }

        info!("Reconnecting in {:?}", config.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = shutdown.recv() => break,
        }
    }
    runtime.connected.store(false, Ordering::SeqCst);
    info!("Connection loop stopped");
}

async fn connect_once(
    config: &AgentConfig,
    runtime: &AgentRuntime,
    outbox_rx: &mut mpsc::Receiver<AgentEvent>,
) -> Result<(), AgentError> {
    let mut request = config.server_url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(CLIENT_TYPE_HEADER, HeaderValue::from_static(AGENT_CLIENT_TYPE));

    info!("Connecting to {}", config.server_url);
    let (socket, _) = connect_async(request).await?;
    let (mut sink, mut stream) = socket.split();

    runtime.connected.store(true, Ordering::SeqCst);
    info!("Connected to hub");

    send_register(&mut sink).await?;
    runtime.executor.emit_prompt().await;

    let result = session_loop(runtime, &mut sink, &mut stream, outbox_rx).await;
    let _ = sink.close().await;
    result
}

async fn session_loop(
    runtime: &AgentRuntime,
    sink: &mut WsSink,
    stream: &mut WsStream,
    outbox_rx: &mut mpsc::Receiver<AgentEvent>,
) -> Result<(), AgentError> {
    loop {
        tokio::select! {
            ev = outbox_rx.recv() => {
                let Some(ev) = ev else {
                    // All producers dropped, the agent is going down.
                    return Ok(());
                };
                let json = serde_json::to_string(&ev)?;
                sink.send(Message::text(json)).await?;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    dispatch(runtime, sink, text.as_str()).await?;
                }
                Some(Ok(Message::Ping(data))) => {
                    sink.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

async fn dispatch(
    runtime: &AgentRuntime,
    sink: &mut WsSink,
    text: &str,
) -> Result<(), AgentError> {
    let event: HubEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!("Ignoring unparsable hub message: {}", e);
            return Ok(());
        }
    };

    match event {
        HubEvent::ExecuteCommand { command, sender } => {
            debug!("Command from observer {}: {}", sender, command);
            let handler = Arc::clone(&runtime.handler);
            tokio::spawn(async move {
                handler.handle(&command).await;
            });
        }
        HubEvent::InterruptCommand { sender } => {
            info!("Interrupt requested by observer {}", sender);
            runtime.executor.interrupt();
        }
        HubEvent::RequestRegister { reason } => {
            warn!("Hub requested re-registration: {}", reason);
            send_register(sink).await?;
        }
        HubEvent::RegistrationSuccess { message } => {
            info!("Registered with hub: {}", message);
        }
        HubEvent::RegistrationFailed { message } => {
            warn!("Registration rejected: {}", message);
        }
        HubEvent::ServerTime { timestamp } => {
            debug!("Server time sync: {:.3}", timestamp);
        }
        HubEvent::HeartbeatAck { .. } => {
            debug!("Heartbeat acknowledged");
        }
        other => {
            debug!("Ignoring observer-facing event: {:?}", other);
        }
    }
    Ok(())
}

async fn send_register(sink: &mut WsSink) -> Result<(), AgentError> {
    let (hostname, os) = host_info();
    info!("Registering as {} ({})", hostname, os);
    let json = serde_json::to_string(&AgentEvent::Register { hostname, os })?;
    sink.send(Message::text(json)).await?;
    Ok(())
}
