//! Hub configuration, loaded from a TOML file with warn-and-default
//! semantics: a missing or unparsable file never prevents startup.

use log::{debug, info, warn};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Eviction and acknowledgement timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Idle time after which a session with no active media is evicted.
    pub base_timeout: Duration,
    /// Sessions with an active media stream get `base_timeout * multiplier`.
    pub media_multiplier: u32,
    /// How often the sweeper wakes up. Independent of `base_timeout`.
    pub check_interval: Duration,
    /// Minimum spacing between heartbeat acks to one session.
    pub heartbeat_ack: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(60),
            media_multiplier: 3,
            check_interval: Duration::from_secs(30),
            heartbeat_ack: Duration::from_secs(5),
        }
    }
}

/// Resolved hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub listen_addr: String,
    pub timeouts: TimeoutConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

// On-disk structure. Every section defaults so partial files work.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    server: ServerSection,
    timeouts: TimeoutSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ServerSection {
    listen_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TimeoutSection {
    base_timeout_secs: u64,
    media_multiplier: u32,
    check_interval_secs: u64,
    heartbeat_ack_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            base_timeout_secs: 60,
            media_multiplier: 3,
            check_interval_secs: 30,
            heartbeat_ack_secs: 5,
        }
    }
}

impl HubConfig {
    /// Load config from the default path (`~/.config/clay/hub.toml`).
    pub fn load() -> Self {
        Self::load_from_path(&Self::default_config_path())
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("clay")
            .join("hub.toml")
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
            listen_addr: file.server.listen_addr,
            timeouts: TimeoutConfig {
                base_timeout: Duration::from_secs(file.timeouts.base_timeout_secs),
                media_multiplier: file.timeouts.media_multiplier,
                check_interval: Duration::from_secs(file.timeouts.check_interval_secs),
                heartbeat_ack: Duration::from_secs(file.timeouts.heartbeat_ack_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = HubConfig::load_from_path(Path::new("/nonexistent/clay/hub.toml"));
        assert_eq!(config.listen_addr, "0.0.0.0:5000");
        assert_eq!(config.timeouts.base_timeout, Duration::from_secs(60));
        assert_eq!(config.timeouts.media_multiplier, 3);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nlisten_addr = \"127.0.0.1:9000\"\n\n[timeouts]\nbase_timeout_secs = 10"
        )
        .unwrap();

        let config = HubConfig::load_from_path(file.path());
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.timeouts.base_timeout, Duration::from_secs(10));
        // Unspecified fields keep their defaults.
        assert_eq!(config.timeouts.check_interval, Duration::from_secs(30));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [[[").unwrap();

        let config = HubConfig::load_from_path(file.path());
        assert_eq!(config.listen_addr, "0.0.0.0:5000");
    }
}
