//! Periodic screen monitor.
//!
//! A single background task captures the screen on a fixed cadence,
//! slowing down under CPU pressure and backing off after capture
//! failures. Quality and scale are adjustable at runtime without
//! restarting the task.

use crate::Outbox;
use crate::capture::{CaptureError, CaptureProvider, CpuProbe};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clay_protocol::{AgentEvent, epoch_secs};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// CPU utilization above which the capture interval doubles.
const CPU_HIGH_WATER: f32 = 80.0;

/// Consecutive failures after which warnings stop and backoff lengthens.
const FAILURE_WARN_LIMIT: u32 = 3;

#[derive(Debug, Error, PartialEq)]
pub enum MonitorError {
    #[error("screen monitoring is already running")]
    AlreadyRunning,

    #[error("screen monitoring is not running")]
    NotRunning,

    #[error("quality must be between 1 and 100, got {0}")]
    InvalidQuality(u32),

    #[error("scale must be between 0.1 and 1.0, got {0}")]
    InvalidScale(f32),
}

/// Runtime-adjustable capture settings. Scale is stored as an integer
/// percentage so both knobs fit in lock-free atomics.
pub struct MonitorSettings {
    quality: AtomicU8,
    scale_percent: AtomicU8,
}

impl MonitorSettings {
    pub fn new(quality: u8, scale: f32) -> Self {
        Self {
            quality: AtomicU8::new(quality),
            scale_percent: AtomicU8::new((scale * 100.0).round() as u8),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality.load(Ordering::Relaxed)
    }

    pub fn set_quality(&self, quality: u32) -> Result<(), MonitorError> {
        if !(1..=100).contains(&quality) {
            return Err(MonitorError::InvalidQuality(quality));
        }
        self.quality.store(quality as u8, Ordering::Relaxed);
        Ok(())
    }

    pub fn scale(&self) -> f32 {
        f32::from(self.scale_percent.load(Ordering::Relaxed)) / 100.0
    }

    pub fn set_scale(&self, scale: f32) -> Result<(), MonitorError> {
        if !(0.1..=1.0).contains(&scale) {
            return Err(MonitorError::InvalidScale(scale));
        }
        self.scale_percent
            .store((scale * 100.0).round() as u8, Ordering::Relaxed);
        Ok(())
    }
}

pub struct ScreenMonitor {
    outbox: Outbox,
    provider: Arc<dyn CaptureProvider>,
    cpu: Arc<dyn CpuProbe>,
    settings: MonitorSettings,
    interval: Duration,
    running: AtomicBool,
    stop_tx: Mutex<Option<broadcast::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScreenMonitor {
    pub fn new(
        outbox: Outbox,
        provider: Arc<dyn CaptureProvider>,
        cpu: Arc<dyn CpuProbe>,
        interval: Duration,
        quality: u8,
        scale: f32,
    ) -> Self {
        Self {
            outbox,
            provider,
            cpu,
            settings: MonitorSettings::new(quality, scale),
            interval,
            running: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start the periodic capture loop.
    pub fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }
        let (stop_tx, stop_rx) = broadcast::channel(1);
        *self.stop_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(stop_tx);

        let this = Arc::clone(self);
        let handle = tokio::spawn(this.run_loop(stop_rx));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("Screen monitoring started (interval {:?})", self.interval);
        Ok(())
    }

    /// Stop the capture loop and wait briefly for the task to wind down.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(MonitorError::NotRunning);
        }
        if let Some(tx) = self.stop_tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(());
        }
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("Screen monitor task did not stop within 5s, detaching");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Screen monitoring stopped");
        Ok(())
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: broadcast::Receiver<()>) {
        self.emit("\n[CLAY] 🖥️ Screen monitoring started\n").await;
        let mut consecutive_failures: u32 = 0;

        loop {
            let wait = match self.capture_and_send().await {
                Ok(()) => {
                    consecutive_failures = 0;
                    let cpu = self.cpu.cpu_percent();
                    if cpu > CPU_HIGH_WATER {
                        debug!("CPU at {:.0}%, slowing capture cadence", cpu);
                        self.interval * 2
                    } else {
                        self.interval
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures <= FAILURE_WARN_LIMIT {
                        warn!("Screen capture failed ({}): {}", consecutive_failures, e);
                        self.emit(format!("[CLAY] ⚠️ Screen capture failed: {}\n", e))
                            .await;
                    } else if consecutive_failures == FAILURE_WARN_LIMIT + 1 {
                        warn!("Screen capture keeps failing, suppressing further warnings");
                        self.emit(
                            "[CLAY] ⚠️ Screen capture keeps failing, retrying quietly\n",
                        )
                        .await;
                    }
                    failure_backoff(consecutive_failures, self.interval)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop_rx.recv() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.emit("\n[CLAY] 🖥️ Screen monitoring stopped\n").await;
    }

    async fn capture_and_send(&self) -> Result<(), CaptureError> {
        let frame = self
            .provider
            .capture_screen(self.settings.quality(), self.settings.scale())
            .await?;
        let ev = AgentEvent::ScreenFrame {
            image_data: BASE64.encode(&frame.data),
            timestamp: epoch_secs(),
            width: frame.width,
            height: frame.height,
        };
        let _ = self.outbox.send(ev).await;
        Ok(())
    }

    /// Capture a single screen frame at an overridden quality, restoring
    /// the configured quality afterwards whatever the outcome.
    pub async fn capture_once(&self, quality: u32) -> Result<(), MonitorError> {
        let previous = self.settings.quality();
        self.settings.set_quality(quality)?;
        self.emit(format!(
            "\n[CLAY] 🖥️ Capturing screenshot (quality {}%)...\n",
            quality
        ))
        .await;

        let result = self.capture_and_send().await;
        self.settings
            .quality
            .store(previous, Ordering::Relaxed);

        match result {
            Ok(()) => {
                self.emit("[CLAY] ✅ Screenshot sent\n").await;
            }
            Err(e) => {
                warn!("One-shot screen capture failed: {}", e);
                self.emit(format!("[CLAY] ❌ Screenshot failed: {}\n", e))
                    .await;
            }
        }
        Ok(())
    }

    /// Capture a single camera frame at the configured quality.
    pub async fn capture_webcam_once(&self) {
        self.emit("\n[CLAY] 📷 Accessing camera...\n").await;
        match self.provider.capture_webcam(self.settings.quality()).await {
            Ok(frame) => {
                let ev = AgentEvent::WebcamFrame {
                    image_data: BASE64.encode(&frame.data),
                    timestamp: epoch_secs(),
                };
                let _ = self.outbox.send(ev).await;
                self.emit("[CLAY] ✅ Camera frame sent\n").await;
            }
            Err(e) => {
                warn!("Webcam capture failed: {}", e);
                self.emit(format!("[CLAY] ❌ Camera capture failed: {}\n", e))
                    .await;
            }
        }
    }

    async fn emit(&self, text: impl Into<String>) {
        let ev = AgentEvent::TerminalOutput {
            output: text.into(),
        };
        let _ = self.outbox.send(ev).await;
    }
}

/// Backoff after the nth consecutive capture failure. Early failures
/// retry quickly; persistent ones settle on a long quiet interval.
fn failure_backoff(consecutive_failures: u32, interval: Duration) -> Duration {
    if consecutive_failures < 5 {
        interval.min(Duration::from_secs(5))
    } else {
        Duration::from_secs(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_reject_out_of_range_values() {
        let settings = MonitorSettings::new(80, 1.0);
        assert_eq!(
            settings.set_quality(0),
            Err(MonitorError::InvalidQuality(0))
        );
        assert_eq!(
            settings.set_quality(101),
            Err(MonitorError::InvalidQuality(101))
        );
        assert_eq!(settings.quality(), 80);

        assert!(settings.set_scale(0.05).is_err());
        assert!(settings.set_scale(1.5).is_err());
        assert!((settings.scale() - 1.0).abs() < f32::EPSILON);

        settings.set_quality(55).unwrap();
        settings.set_scale(0.5).unwrap();
        assert_eq!(settings.quality(), 55);
        assert!((settings.scale() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn failure_backoff_shortens_then_settles() {
        let interval = Duration::from_secs(30);
        assert_eq!(failure_backoff(1, interval), Duration::from_secs(5));
        assert_eq!(failure_backoff(4, interval), Duration::from_secs(5));
        assert_eq!(failure_backoff(5, interval), Duration::from_secs(10));
        assert_eq!(failure_backoff(50, interval), Duration::from_secs(10));

        // An interval shorter than the failure floor wins.
        let short = Duration::from_millis(20);
        assert_eq!(failure_backoff(1, short), short);
    }
}
