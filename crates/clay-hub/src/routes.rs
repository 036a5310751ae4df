//! WebSocket route and per-connection socket loop.

use crate::api;
use crate::handler::{self, ConnectionRole};
use crate::hub::{CONNECTION_BUFFER_SIZE, RelayHub};
use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use clay_protocol::{AGENT_CLIENT_TYPE, AgentEvent, CLIENT_TYPE_HEADER, HubEvent, ObserverCommand};
use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RelayHub>,
}

/// Build the hub router: the relay WebSocket plus the JSON client list.
pub fn router(hub: Arc<RelayHub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/clients", get(api::list_clients))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { hub })
}

/// Classify the connection from the upgrade headers and hand the socket
/// off. The type marker is read exactly once; the role never changes for
/// the connection's lifetime.
async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let role = match headers
        .get(CLIENT_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(AGENT_CLIENT_TYPE) => ConnectionRole::Agent,
        _ => ConnectionRole::Observer,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, role, addr))
}

/// Run one connection until it closes.
async fn handle_socket(mut socket: WebSocket, hub: Arc<RelayHub>, role: ConnectionRole, addr: SocketAddr) {
    let conn_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<HubEvent>(CONNECTION_BUFFER_SIZE);
    let address = addr.ip().to_string();

    match role {
        ConnectionRole::Agent => handler::on_agent_connect(&hub, &conn_id, &address, tx).await,
        ConnectionRole::Observer => {
            handler::on_observer_connect(&hub, &conn_id, &address, tx).await
        }
    }

    loop {
        tokio::select! {
            // Outbound events queued for this connection.
            outbound = rx.recv() => {
                match outbound {
                    Some(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if socket.send(Message::Text(json.into())).await.is_err() {
                                    debug!("Send to {} failed, connection closed", conn_id);
                                    break;
                                }
                            }
                            Err(e) => warn!("Failed to serialize event for {}: {}", conn_id, e),
                        }
                    }
                    None => break,
                }
            }

            // Inbound messages from the peer.
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&hub, &conn_id, role, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Connection {} sent close", conn_id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", conn_id, e);
                        break;
                    }
                    None => {
                        debug!("Connection {} closed", conn_id);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handler::on_disconnect(&hub, &conn_id, role).await;
}

/// Parse and route one inbound text frame by connection role. Malformed
/// payloads get a best-effort connection_error and never kill the loop.
async fn dispatch(hub: &Arc<RelayHub>, conn_id: &str, role: ConnectionRole, text: &str) {
    match role {
        ConnectionRole::Agent => match serde_json::from_str::<AgentEvent>(text) {
            Ok(event) => handler::on_agent_event(hub, conn_id, event).await,
            Err(e) => {
                warn!("Malformed agent event from {}: {}", conn_id, e);
                let reply = HubEvent::ConnectionError {
                    message: format!("malformed event: {}", e),
                };
                if let Err(e) = hub.send_to_agent(conn_id, reply).await {
                    debug!("Could not deliver connection_error to {}: {}", conn_id, e);
                }
            }
        },
        ConnectionRole::Observer => match serde_json::from_str::<ObserverCommand>(text) {
            Ok(command) => handler::on_observer_command(hub, conn_id, command).await,
            Err(e) => {
                warn!("Malformed observer command from {}: {}", conn_id, e);
                let reply = HubEvent::ConnectionError {
                    message: format!("malformed command: {}", e),
                };
                if let Err(e) = hub.send_to_observer(conn_id, reply).await {
                    debug!("Could not deliver connection_error to {}: {}", conn_id, e);
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn api_clients_lists_registered_sessions() {
        let hub = Arc::new(RelayHub::new(TimeoutConfig::default()));
        hub.registry().add("c1", "10.0.0.1");
        hub.registry().update_info("c1", "H1", "Linux 5.0");
        let app = router(hub);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/clients")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["clients"][0]["hostname"], "H1");
    }
}
