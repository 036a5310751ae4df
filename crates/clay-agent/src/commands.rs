//! Built-in `clay` command handling.
//!
//! Commands arriving from observers are first checked against the agent's
//! built-in vocabulary (monitoring control, one-shot captures, status);
//! anything unrecognized falls through to the shell executor.

use crate::Outbox;
use crate::config::AgentConfig;
use crate::executor::CommandExecutor;
use crate::monitor::ScreenMonitor;
use clay_protocol::AgentEvent;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const HELP_TEXT: &str = "\n[CLAY] Built-in commands:\n\
  clay help                    show this help\n\
  clay status                  show agent status\n\
  clay screen on               start periodic screen monitoring\n\
  clay screen off              stop screen monitoring\n\
  clay screen quality <1-100>  set capture quality\n\
  clay screen scale <0.1-1.0>  set capture scale\n\
  clay screen capture [q]      one-shot screenshot, optional quality\n\
  capture_webcam               one-shot camera frame\n\
  lock                         lock the local session\n\
Anything else runs in the system shell.\n\n";

pub struct CommandHandler {
    outbox: Outbox,
    executor: Arc<CommandExecutor>,
    monitor: Arc<ScreenMonitor>,
    connected: Arc<AtomicBool>,
    server_url: String,
}

impl CommandHandler {
    pub fn new(
        outbox: Outbox,
        executor: Arc<CommandExecutor>,
        monitor: Arc<ScreenMonitor>,
        connected: Arc<AtomicBool>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            outbox,
            executor,
            monitor,
            connected,
            server_url: config.server_url.clone(),
        }
    }

    /// Dispatch one observer command.
    pub async fn handle(&self, command: &str) {
        let trimmed = command.trim();
        let normalized = trimmed.to_lowercase();
        debug!("Handling command: {}", trimmed);

        match normalized.as_str() {
            "clay help" | "clay" => self.emit(HELP_TEXT).await,
            "clay status" => self.status().await,
            "clay screen on" => self.screen_on().await,
            "clay screen off" => self.screen_off().await,
            "capture_webcam" => self.monitor.capture_webcam_once().await,
            "lock" => self.lock_screen().await,
            _ if normalized.starts_with("clay screen quality") => {
                self.set_quality(trimmed).await;
            }
            _ if normalized.starts_with("clay screen scale") => {
                self.set_scale(trimmed).await;
            }
            _ if normalized.starts_with("clay screen capture") => {
                self.one_shot(trimmed).await;
            }
            _ if normalized.starts_with("clay") => {
                self.emit(format!(
                    "\n[CLAY] ❌ Unknown clay command: {}\n{}",
                    trimmed, HELP_TEXT
                ))
                .await;
            }
            _ => self.executor.execute(trimmed).await,
        }
    }

    async fn status(&self) {
        let connection = if self.connected.load(Ordering::Relaxed) {
            "connected"
        } else {
            "disconnected"
        };
        let monitoring = if self.monitor.is_running() {
            "on"
        } else {
            "off"
        };
        let settings = self.monitor.settings();
        self.emit(format!(
            "\n[CLAY] Agent status:\n\
  server:       {} ({})\n\
  monitoring:   {} (quality {}%, scale {:.0}%)\n\
  commands:     {} running\n\
  working dir:  {}\n\n",
            self.server_url,
            connection,
            monitoring,
            settings.quality(),
            settings.scale() * 100.0,
            self.executor.in_flight(),
            self.executor.cwd().display(),
        ))
        .await;
    }

    async fn screen_on(&self) {
        match self.monitor.start() {
            Ok(()) => {}
            Err(e) => self.emit(format!("\n[CLAY] ❌ {}\n", e)).await,
        }
    }

    async fn screen_off(&self) {
        match self.monitor.stop().await {
            Ok(()) => {}
            Err(e) => self.emit(format!("\n[CLAY] ❌ {}\n", e)).await,
        }
    }

    async fn set_quality(&self, command: &str) {
        let Some(value) = last_token_parsed::<u32>(command) else {
            self.emit("\n[CLAY] ❌ Usage: clay screen quality <1-100>\n")
                .await;
            return;
        };
        match self.monitor.settings().set_quality(value) {
            Ok(()) => {
                self.emit(format!("\n[CLAY] ✅ Screen quality set to {}%\n", value))
                    .await;
            }
            Err(e) => self.emit(format!("\n[CLAY] ❌ {}\n", e)).await,
        }
    }

    async fn set_scale(&self, command: &str) {
        let Some(value) = last_token_parsed::<f32>(command) else {
            self.emit("\n[CLAY] ❌ Usage: clay screen scale <0.1-1.0>\n")
                .await;
            return;
        };
        match self.monitor.settings().set_scale(value) {
            Ok(()) => {
                self.emit(format!(
                    "\n[CLAY] ✅ Screen scale set to {:.0}%\n",
                    value * 100.0
                ))
                .await;
            }
            Err(e) => self.emit(format!("\n[CLAY] ❌ {}\n", e)).await,
        }
    }

    /// Lock the local session via the platform's lock utility. The
    /// outcome goes back as a structured `command_result`, not just
    /// terminal output, so consoles can track it.
    async fn lock_screen(&self) {
        self.emit("\n[CLAY] 🔒 Locking screen...\n").await;
        let (success, message) = match lock_command().output().await {
            Ok(output) if output.status.success() => (true, "screen locked".to_string()),
            Ok(output) => (
                false,
                format!("lock command exited with {}", output.status),
            ),
            Err(e) => (false, format!("failed to run lock command: {}", e)),
        };

        if success {
            self.emit("[CLAY] ✅ Screen locked\n").await;
        } else {
            warn!("Screen lock failed: {}", message);
            self.emit(format!("[CLAY] ❌ Screen lock failed: {}\n", message))
                .await;
        }
        let _ = self
            .outbox
            .send(AgentEvent::CommandResult {
                command: "lock".to_string(),
                success,
                message,
            })
            .await;
    }

    async fn one_shot(&self, command: &str) {
        // "clay screen capture" optionally takes a quality override.
        let quality = command
            .split_whitespace()
            .nth(3)
            .and_then(|t| t.parse::<u32>().ok())
            .unwrap_or(60);
        if let Err(e) = self.monitor.capture_once(quality).await {
            self.emit(format!("\n[CLAY] ❌ {}\n", e)).await;
        }
    }

    async fn emit(&self, text: impl Into<String>) {
        let ev = AgentEvent::TerminalOutput {
            output: text.into(),
        };
        let _ = self.outbox.send(ev).await;
    }
}

/// Parse the trailing token of a command as a value.
fn last_token_parsed<T: std::str::FromStr>(command: &str) -> Option<T> {
    command.split_whitespace().last()?.parse().ok()
}

#[cfg(target_os = "windows")]
fn lock_command() -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("rundll32.exe");
    cmd.args(["user32.dll,LockWorkStation"]);
    cmd
}

#[cfg(target_os = "macos")]
fn lock_command() -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("pmset");
    cmd.args(["displaysleepnow"]);
    cmd
}

#[cfg(all(unix, not(target_os = "macos")))]
fn lock_command() -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("loginctl");
    cmd.arg("lock-session");
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CpuProbe, NullCaptureProvider};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct IdleCpu;

    impl CpuProbe for IdleCpu {
        fn cpu_percent(&self) -> f32 {
            0.0
        }
    }

    fn handler() -> (CommandHandler, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let config = AgentConfig::default();
        let executor = Arc::new(CommandExecutor::new(
            tx.clone(),
            config.max_concurrent_commands,
            config.command_timeout,
        ));
        let monitor = Arc::new(ScreenMonitor::new(
            tx.clone(),
            Arc::new(NullCaptureProvider),
            Arc::new(IdleCpu),
            config.screenshot_interval,
            config.screenshot_quality,
            config.screenshot_scale,
        ));
        let connected = Arc::new(AtomicBool::new(true));
        (
            CommandHandler::new(tx, executor, monitor, connected, &config),
            rx,
        )
    }

    #[tokio::test]
    async fn lock_builtin_emits_a_structured_result() {
        let (handler, mut rx) = handler();
        handler.handle("lock").await;

        // Whether the platform lock utility exists or not, the outcome
        // must come back as a command_result, not just terminal output.
        let result = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Some(AgentEvent::CommandResult {
                        command,
                        success,
                        message,
                    }) => return (command, success, message),
                    Some(_) => {}
                    None => panic!("outbox closed without a command_result"),
                }
            }
        })
        .await
        .expect("no command_result emitted for lock");

        assert_eq!(result.0, "lock");
        assert!(!result.2.is_empty());
    }

    #[test]
    fn last_token_parses_numbers() {
        assert_eq!(last_token_parsed::<u32>("clay screen quality 75"), Some(75));
        assert_eq!(
            last_token_parsed::<f32>("clay screen scale 0.5"),
            Some(0.5)
        );
        assert_eq!(last_token_parsed::<u32>("clay screen quality"), None);
    }
}
