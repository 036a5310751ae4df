//! Agent configuration, loaded from a TOML file with warn-and-default
//! semantics, same as the hub: the daemon always starts.

use log::{debug, info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// WebSocket endpoint of the hub, e.g. `ws://127.0.0.1:5000/ws`.
    pub server_url: String,
    /// Spacing between heartbeats while connected.
    pub heartbeat_interval: Duration,
    /// Backoff between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Base spacing between periodic screen captures.
    pub screenshot_interval: Duration,
    /// Default JPEG quality for periodic captures (1-100).
    pub screenshot_quality: u8,
    /// Default capture scale factor (0.1-1.0).
    pub screenshot_scale: f32,
    /// Hard deadline for a single shell command.
    pub command_timeout: Duration,
    /// Size of the bounded command process pool.
    pub max_concurrent_commands: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:5000/ws".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            screenshot_interval: Duration::from_secs(30),
            screenshot_quality: 80,
            screenshot_scale: 1.0,
            command_timeout: Duration::from_secs(300),
            max_concurrent_commands: 5,
        }
    }
}

// On-disk structure. Every section defaults so partial files work.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    server: ServerSection,
    monitor: MonitorSection,
    commands: CommandSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ServerSection {
    url: String,
    heartbeat_interval_secs: u64,
    reconnect_delay_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/ws".to_string(),
            heartbeat_interval_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct MonitorSection {
    interval_secs: u64,
    quality: u8,
    scale: f32,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            quality: 80,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CommandSection {
    timeout_secs: u64,
    max_concurrent: usize,
}

impl Default for CommandSection {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_concurrent: 5,
        }
    }
}

impl AgentConfig {
    /// Load config from the default path (`~/.config/clay/agent.toml`).
    pub fn load() -> Self {
        Self::load_from_path(&Self::default_config_path())
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("clay")
            .join("agent.toml")
    }

    pub fn load_from_path(path: &Path) -> Self {
        let file: ConfigFile = if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => {
                        info!("Loaded config from {:?}", path);
                        config
                    }
                    Err(e) => {
                        warn!("Failed to parse config {:?}: {}, using defaults", path, e);
                        ConfigFile::default()
                    }
                },
                Err(e) => {
                    warn!("Failed to read config {:?}: {}, using defaults", path, e);
                    ConfigFile::default()
                }
            }
        } else {
            debug!("Config file {:?} not found, using defaults", path);
            ConfigFile::default()
        };

        Self {
            server_url: file.server.url,
            heartbeat_interval: Duration::from_secs(file.server.heartbeat_interval_secs),
            reconnect_delay: Duration::from_secs(file.server.reconnect_delay_secs),
            screenshot_interval: Duration::from_secs(file.monitor.interval_secs),
            screenshot_quality: file.monitor.quality.clamp(1, 100),
            screenshot_scale: file.monitor.scale.clamp(0.1, 1.0),
            command_timeout: Duration::from_secs(file.commands.timeout_secs),
            max_concurrent_commands: file.commands.max_concurrent.max(1),
        }
    }
}
