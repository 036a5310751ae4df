//! Plain HTTP surface next to the WebSocket relay.

use crate::routes::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use clay_protocol::SessionSnapshot;
use serde::Serialize;

/// Response body for the client-list endpoint.
#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    pub success: bool,
    pub clients: Vec<SessionSnapshot>,
}

/// `GET /api/clients` — current session list as JSON.
pub async fn list_clients(State(state): State<AppState>) -> impl IntoResponse {
    Json(ClientsResponse {
        success: true,
        clients: state.hub.registry().list(),
    })
}
