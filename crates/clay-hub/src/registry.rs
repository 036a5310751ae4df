//! In-memory session registry.
//!
//! The registry is the single authority for agent presence and
//! media-activity flags. It is pure in-process state scoped to the hub's
//! lifetime; nothing survives a restart. All operations are O(1) map
//! accesses and safe under concurrent invocation from connection handlers
//! and the timeout sweeper.

use clay_protocol::{SessionSnapshot, epoch_secs};
use dashmap::DashMap;
use log::debug;
use std::time::{Duration, Instant};

/// Hostname/os value until the agent registers.
pub const UNKNOWN_SENTINEL: &str = "unknown";

/// Which media stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Screen,
    Webcam,
}

/// One live agent session.
///
/// `last_seen` is monotonic and only moves forward while the session is
/// live; the wall-clock mirrors exist for presentation snapshots.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub address: String,
    pub hostname: String,
    pub os: String,
    pub connected_at: f64,
    pub last_seen: Instant,
    pub last_seen_at: f64,
    pub screen_active: bool,
    pub webcam_active: bool,
    pub last_screen: f64,
}

impl Session {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            address: self.address.clone(),
            hostname: self.hostname.clone(),
            os: self.os.clone(),
            last_seen: self.last_seen_at,
            connected_at: self.connected_at,
            screen_active: self.screen_active,
            webcam_active: self.webcam_active,
            last_screen: self.last_screen,
        }
    }
}

/// Concurrent map of connection id to session state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Insert a fresh session with sentinel hostname/os.
    ///
    /// Transport guarantees make duplicate ids impossible for live
    /// connections, so a collision is logged and ignored rather than
    /// clobbering the existing session.
    pub fn add(&self, id: &str, address: &str) {
        if self.sessions.contains_key(id) {
            debug!("Session {} already present, ignoring duplicate add", id);
            return;
        }
        let now_wall = epoch_secs();
        self.sessions.insert(
            id.to_string(),
            Session {
                id: id.to_string(),
                address: address.to_string(),
                hostname: UNKNOWN_SENTINEL.to_string(),
                os: UNKNOWN_SENTINEL.to_string(),
                connected_at: now_wall,
                last_seen: Instant::now(),
                last_seen_at: now_wall,
                screen_active: false,
                webcam_active: false,
                last_screen: 0.0,
            },
        );
        debug!("Session added: {}", id);
    }

    /// Remove a session. Returns false if it was not present.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!("Session removed: {}", id);
        }
        removed
    }

    /// Set hostname and os from a `register` event; bumps `last_seen`.
    /// A second register overwrites, never merges.
    pub fn update_info(&self, id: &str, hostname: &str, os: &str) -> bool {
        let Some(mut session) = self.sessions.get_mut(id) else {
            return false;
        };
        session.hostname = hostname.to_string();
        session.os = os.to_string();
        session.last_seen = Instant::now();
        session.last_seen_at = epoch_secs();
        true
    }

    /// Bump `last_seen`. Returns false if the session is unknown.
    pub fn touch(&self, id: &str) -> bool {
        let Some(mut session) = self.sessions.get_mut(id) else {
            return false;
        };
        session.last_seen = Instant::now();
        session.last_seen_at = epoch_secs();
        true
    }

    /// Flip a media-activity flag. Activating the screen stream also
    /// stamps `last_screen`.
    pub fn set_media_active(&self, id: &str, kind: MediaKind, active: bool) -> bool {
        let Some(mut session) = self.sessions.get_mut(id) else {
            return false;
        };
        match kind {
            MediaKind::Screen => {
                session.screen_active = active;
                if active {
                    session.last_screen = epoch_secs();
                }
            }
            MediaKind::Webcam => session.webcam_active = active,
        }
        true
    }

    /// Read-only snapshot of one session.
    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(id).map(|s| s.snapshot())
    }

    /// Snapshots of all live sessions, in no guaranteed order.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(|entry| entry.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session whose idle time exceeds its timeout and return
    /// the evicted ids.
    ///
    /// A session streaming media gets `base_timeout * media_multiplier`
    /// before eviction; everything else gets `base_timeout`.
    pub fn evict_expired(
        &self,
        now: Instant,
        base_timeout: Duration,
        media_multiplier: u32,
    ) -> Vec<String> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                let idle = now.saturating_duration_since(entry.last_seen);
                if idle <= base_timeout {
                    return false;
                }
                if entry.screen_active || entry.webcam_active {
                    idle > base_timeout * media_multiplier
                } else {
                    true
                }
            })
            .map(|entry| entry.id.clone())
            .collect();

        for id in &expired {
            self.sessions.remove(id);
        }
        expired
    }
}
