//! Clay hub: session registry and real-time relay.
//!
//! Agents hold one persistent WebSocket connection each and stream
//! heartbeats, terminal output and media frames; observer consoles join a
//! broadcast group and issue targeted commands. The hub tracks agent
//! presence, routes commands to individual agents, relays agent events to
//! the observer group and evicts sessions that go silent.

pub mod api;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod registry;
pub mod routes;
pub mod sweeper;
