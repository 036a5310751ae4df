//! Hub-side relay errors.

use thiserror::Error;

/// Errors surfaced by relay and routing operations.
///
/// These are recovered at the handler boundary and converted into
/// best-effort error events; they never take down the dispatch loop.
#[derive(Debug, Error)]
pub enum HubError {
    /// The target session id is not in the registry.
    #[error("session {0} does not exist or has disconnected")]
    UnknownSession(String),

    /// The target connection's outbox is gone (connection torn down).
    #[error("connection {0} is no longer reachable")]
    ConnectionGone(String),

    /// A payload failed validation (empty output, empty frame, ...).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
