use thiserror::Error;

/// Errors surfaced by the agent's connection and task layers.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode outbound event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("server closed the connection")]
    ConnectionClosed,
}
