//! Executor behavior against a real shell.
#![cfg(unix)]

use clay_agent::executor::CommandExecutor;
use clay_protocol::AgentEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn executor(pool: usize, timeout: Duration) -> (Arc<CommandExecutor>, mpsc::Receiver<AgentEvent>) {
    let (tx, rx) = mpsc::channel(256);
    (Arc::new(CommandExecutor::new(tx, pool, timeout)), rx)
}

/// Accumulate terminal output until `pattern` shows up or the deadline hits.
async fn drain_until(
    rx: &mut mpsc::Receiver<AgentEvent>,
    pattern: &str,
    deadline: Duration,
) -> String {
    let mut text = String::new();
    let result = tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Some(AgentEvent::TerminalOutput { output }) => {
                    text.push_str(&output);
                    if text.contains(pattern) {
                        return;
                    }
                }
                Some(_) => {}
                None => return,
            }
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out waiting for {:?}, got:\n{}",
        pattern,
        text
    );
    text
}

#[tokio::test]
async fn echo_streams_output_and_success_footer() {
    let (exec, mut rx) = executor(2, Duration::from_secs(30));
    exec.execute("echo hello").await;

    let text = drain_until(&mut rx, "✅", Duration::from_secs(10)).await;
    assert!(text.contains("🚀 Executing: echo hello"));
    assert!(text.contains("hello\n"));
    assert!(text.contains("1 output lines"));
}

#[tokio::test]
async fn nonzero_exit_reports_code() {
    let (exec, mut rx) = executor(2, Duration::from_secs(30));
    exec.execute("exit 3").await;

    let text = drain_until(&mut rx, "❌", Duration::from_secs(10)).await;
    assert!(text.contains("exited with code 3"));
}

#[tokio::test]
async fn stderr_lines_are_marked_and_indented() {
    let (exec, mut rx) = executor(2, Duration::from_secs(30));
    exec.execute("echo oops 1>&2").await;

    let text = drain_until(&mut rx, "Command succeeded", Duration::from_secs(10)).await;
    assert!(text.contains("⚠️ Error output:"));
    assert!(text.contains("  oops\n"));
}

#[tokio::test]
async fn pool_rejects_excess_commands_then_recovers() {
    let (exec, mut rx) = executor(5, Duration::from_secs(30));
    for _ in 0..5 {
        exec.execute("sleep 1").await;
    }
    assert_eq!(exec.in_flight(), 5);
    exec.execute("echo sixth").await;

    let text = drain_until(&mut rx, "rejected", Duration::from_secs(5)).await;
    assert_eq!(text.matches("Too many concurrent commands").count(), 1);
    assert!(text.contains("echo sixth"));

    // Once the pool drains, new commands are accepted again.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    exec.execute("echo seventh").await;
    let text = drain_until(&mut rx, "seventh\n", Duration::from_secs(10)).await;
    assert!(!text.contains("Too many concurrent commands"));
}

#[tokio::test]
async fn cd_changes_directory_and_updates_prompt() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
    let target = dir.path().canonicalize().unwrap();

    let (exec, mut rx) = executor(2, Duration::from_secs(30));
    exec.execute(&format!("cd {}", target.display())).await;

    let mut text = String::new();
    let mut prompt_path = None;
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Some(AgentEvent::TerminalOutput { output }) => {
                    text.push_str(&output);
                    if text.contains("✅") {
                        return;
                    }
                }
                Some(AgentEvent::TerminalPromptUpdate { full_path, .. }) => {
                    prompt_path = Some(full_path);
                }
                _ => return,
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(exec.cwd(), target);
    assert_eq!(prompt_path.as_deref(), Some(target.display().to_string().as_str()));
    assert!(text.contains("Changed directory to:"));
    assert!(text.contains("marker.txt"));
}

#[tokio::test]
async fn cd_relative_path_resolves_against_cwd() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    let base = dir.path().canonicalize().unwrap();

    let (exec, mut rx) = executor(2, Duration::from_secs(30));
    exec.execute(&format!("cd {}", base.display())).await;
    drain_until(&mut rx, "✅", Duration::from_secs(10)).await;

    exec.execute("cd nested").await;
    drain_until(&mut rx, "✅", Duration::from_secs(10)).await;
    assert_eq!(exec.cwd(), base.join("nested"));
}

#[tokio::test]
async fn cd_to_missing_directory_leaves_cwd_alone() {
    let (exec, mut rx) = executor(2, Duration::from_secs(30));
    let before = exec.cwd();
    exec.execute("cd /definitely/not/a/real/path").await;

    let text = drain_until(&mut rx, "❌", Duration::from_secs(10)).await;
    assert!(text.contains("directory not found"));
    assert_eq!(exec.cwd(), before);
}

#[tokio::test]
async fn long_command_is_killed_on_timeout() {
    let (exec, mut rx) = executor(2, Duration::from_secs(1));
    exec.execute("sleep 30").await;

    let text = drain_until(&mut rx, "⏱️", Duration::from_secs(10)).await;
    assert!(text.contains("timed out after 1s"));
}

#[tokio::test]
async fn interrupt_stops_running_command() {
    let (exec, mut rx) = executor(2, Duration::from_secs(60));
    exec.execute("sleep 30").await;
    drain_until(&mut rx, "🚀", Duration::from_secs(5)).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    exec.interrupt();

    let text = drain_until(&mut rx, "🛑", Duration::from_secs(10)).await;
    assert!(text.contains("Command interrupted"));
}

#[tokio::test]
async fn empty_command_produces_no_output() {
    let (exec, mut rx) = executor(2, Duration::from_secs(30));
    exec.execute("   ").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}
