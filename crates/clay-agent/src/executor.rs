//! Bounded shell command executor.
//!
//! Commands forwarded by observers run under the platform shell with a
//! fixed-size process pool, an overall deadline, and best-effort interrupt.
//! All output travels back as `terminal_output` events through the agent's
//! outbox; the executor never touches the transport directly.

use crate::Outbox;
use clay_protocol::AgentEvent;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Instant;

const SEPARATOR: &str = "--------------------------------------------\n";

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Interrupted,
}

pub struct CommandExecutor {
    outbox: Outbox,
    cwd: Mutex<PathBuf>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    interrupt_tx: broadcast::Sender<()>,
    command_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(outbox: Outbox, pool_size: usize, command_timeout: Duration) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let (interrupt_tx, _) = broadcast::channel(8);
        Self {
            outbox,
            cwd: Mutex::new(cwd),
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            interrupt_tx,
            command_timeout,
        }
    }

    /// Current working directory for subsequent commands.
    pub fn cwd(&self) -> PathBuf {
        self.cwd.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of commands currently running.
    pub fn in_flight(&self) -> usize {
        self.pool_size - self.permits.available_permits()
    }

    /// Signal every running command to stop. Best effort; commands that
    /// finished between the observer's click and now are unaffected.
    pub fn interrupt(&self) {
        match self.interrupt_tx.send(()) {
            Ok(n) => info!("Interrupt signalled to {} running command(s)", n),
            Err(_) => debug!("Interrupt requested with no commands running"),
        }
    }

    async fn emit(&self, text: impl Into<String>) {
        let ev = AgentEvent::TerminalOutput {
            output: text.into(),
        };
        if self.outbox.send(ev).await.is_err() {
            debug!("Outbox closed, dropping terminal output");
        }
    }

    /// Announce the current prompt and working directory to observers.
    pub async fn emit_prompt(&self) {
        let cwd = self.cwd();
        let name = cwd
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| cwd.display().to_string());
        let ev = AgentEvent::TerminalPromptUpdate {
            prompt: format!("{}> ", name),
            full_path: cwd.display().to_string(),
        };
        let _ = self.outbox.send(ev).await;
    }

    /// Run one command. `cd` is handled in-process; everything else goes
    /// through the shell under the process pool. Accepted shell commands
    /// run in the background; this returns as soon as the command is
    /// spawned (or rejected).
    pub async fn execute(self: &Arc<Self>, command: &str) {
        let command = command.trim().to_string();
        if command.is_empty() {
            return;
        }
        let start = Instant::now();

        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            warn!("Command pool full, rejecting: {}", command);
            self.emit(format!(
                "\n[CLAY] ⚠️ Too many concurrent commands ({} running), rejected: {}\n\n",
                self.pool_size, command
            ))
            .await;
            return;
        };

        self.emit(format!("\n[CLAY] 🚀 Executing: {}\n", command))
            .await;
        self.emit(SEPARATOR).await;

        if let Some(target) = strip_cd(&command) {
            // Directory changes mutate executor state; no child process.
            drop(permit);
            self.change_directory(&target, start).await;
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_shell(command, start, permit).await;
        });
    }

    async fn run_shell(
        &self,
        command: String,
        start: Instant,
        _permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let mut cmd = shell_command(&command);
        cmd.current_dir(self.cwd())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn '{}': {}", command, e);
                self.emit(format!("\n[CLAY] 🛑 Execution error: {}\n\n", e))
                    .await;
                return;
            }
        };
        debug!("Spawned '{}' (pid {:?})", command, child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut interrupt_rx = self.interrupt_tx.subscribe();
        let mut line_count: u64 = 0;

        let outcome = {
            let work = async {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        line_count += 1;
                        self.emit(format!("{}\n", line)).await;
                    }
                }
                if let Some(stderr) = stderr {
                    let mut lines = BufReader::new(stderr).lines();
                    let mut first = true;
                    while let Ok(Some(line)) = lines.next_line().await {
                        if first {
                            self.emit("\n[CLAY] ⚠️ Error output:\n").await;
                            first = false;
                        }
                        self.emit(format!("  {}\n", line)).await;
                    }
                }
                child.wait().await
            };
            tokio::pin!(work);
            tokio::select! {
                res = &mut work => Outcome::Exited(res),
                _ = tokio::time::sleep(self.command_timeout) => Outcome::TimedOut,
                _ = interrupt_rx.recv() => Outcome::Interrupted,
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        match outcome {
            Outcome::Exited(Ok(status)) => {
                self.emit(SEPARATOR).await;
                if status.success() {
                    if line_count > 0 {
                        self.emit(format!(
                            "[CLAY] ✅ Command succeeded ({:.2}s, {} output lines)\n\n",
                            elapsed, line_count
                        ))
                        .await;
                    } else {
                        self.emit(format!(
                            "[CLAY] ✅ Command succeeded with no output ({:.2}s)\n\n",
                            elapsed
                        ))
                        .await;
                    }
                } else {
                    let code = status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string());
                    self.emit(format!(
                        "[CLAY] ❌ Command exited with code {} ({:.2}s)\n\n",
                        code, elapsed
                    ))
                    .await;
                }
            }
            Outcome::Exited(Err(e)) => {
                warn!("Wait failed for '{}': {}", command, e);
                self.emit(format!("\n[CLAY] 🛑 Execution error: {}\n\n", e))
                    .await;
            }
            Outcome::TimedOut => {
                warn!("Command timed out after {:?}: {}", self.command_timeout, command);
                let _ = child.start_kill();
                let _ = child.wait().await;
                self.emit(format!(
                    "\n[CLAY] ⏱️ Command timed out after {}s and was killed\n\n",
                    self.command_timeout.as_secs()
                ))
                .await;
            }
            Outcome::Interrupted => {
                info!("Command interrupted: {}", command);
                let _ = child.start_kill();
                let _ = child.wait().await;
                self.emit(format!("\n[CLAY] 🛑 Command interrupted ({:.2}s)\n\n", elapsed))
                    .await;
            }
        }
    }

    async fn change_directory(&self, target: &str, start: Instant) {
        let mut target = target.trim().to_string();

        if target == "~" || target.starts_with("~/") {
            if let Some(home) = dirs::home_dir() {
                target = if target == "~" {
                    home.display().to_string()
                } else {
                    home.join(&target[2..]).display().to_string()
                };
            }
        }

        // Let the shell expand environment references like $HOME or %USERPROFILE%.
        if target.contains('$') || target.contains('%') {
            if let Ok(output) = shell_command(&format!("echo {}", target)).output().await {
                let expanded = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !expanded.is_empty() {
                    target = expanded;
                }
            }
        }

        let path = if Path::new(&target).is_absolute() {
            PathBuf::from(&target)
        } else {
            self.cwd().join(&target)
        };

        let elapsed = start.elapsed().as_secs_f64();
        if path.is_dir() {
            let resolved = path.canonicalize().unwrap_or(path);
            *self.cwd.lock().unwrap_or_else(|e| e.into_inner()) = resolved.clone();
            info!("Working directory changed to {:?}", resolved);
            self.emit(format!("Changed directory to: {}\n", resolved.display()))
                .await;

            // Show the new directory's contents the way an interactive
            // shell user would expect.
            if let Ok(output) = listing_command().current_dir(&resolved).output().await {
                let listing = String::from_utf8_lossy(&output.stdout);
                if !listing.is_empty() {
                    self.emit(listing.into_owned()).await;
                }
            }

            self.emit_prompt().await;
            self.emit(format!("\n[CLAY] ✅ Command succeeded ({:.2}s)\n\n", elapsed))
                .await;
        } else {
            warn!("cd target is not a directory: {}", target);
            self.emit(format!("Error: directory not found - {}\n", target))
                .await;
            self.emit(format!("\n[CLAY] ❌ Command failed ({:.2}s)\n\n", elapsed))
                .await;
        }
    }
}

/// Returns the `cd` target if the command is a directory change.
fn strip_cd(command: &str) -> Option<String> {
    let lower = command.to_lowercase();
    if lower == "cd" {
        // Bare `cd` goes home, matching interactive shells.
        return Some("~".to_string());
    }
    lower
        .starts_with("cd ")
        .then(|| command[3..].trim().to_string())
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

#[cfg(unix)]
fn listing_command() -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "ls"]);
    cmd
}

#[cfg(windows)]
fn listing_command() -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", "dir"]);
    cmd
}
