//! Capture provider seam.
//!
//! Screen and camera grabbing is platform work done by an external
//! collaborator; the agent only deals in already-encoded JPEG bytes. The
//! trait keeps the monitor and one-shot paths testable with fakes.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture failed: {0}")]
    Failed(String),

    #[error("capture device unavailable: {0}")]
    Unavailable(String),
}

/// One encoded image as produced by a capture provider.
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG bytes, not yet base64-encoded.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Source of screen and camera frames.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Grab one screen frame at the given JPEG quality (1-100) and scale
    /// factor (0.1-1.0).
    async fn capture_screen(&self, quality: u8, scale: f32) -> Result<Frame, CaptureError>;

    /// Grab one camera frame at the given JPEG quality.
    async fn capture_webcam(&self, quality: u8) -> Result<Frame, CaptureError>;
}

/// Provider used when no platform capture backend is wired in. Every
/// request fails with a clear message instead of crashing the monitor.
pub struct NullCaptureProvider;

#[async_trait]
impl CaptureProvider for NullCaptureProvider {
    async fn capture_screen(&self, _quality: u8, _scale: f32) -> Result<Frame, CaptureError> {
        Err(CaptureError::Unavailable(
            "no screen capture backend configured".to_string(),
        ))
    }

    async fn capture_webcam(&self, _quality: u8) -> Result<Frame, CaptureError> {
        Err(CaptureError::Unavailable(
            "no camera backend configured".to_string(),
        ))
    }
}

/// CPU load probe, separated from the capture provider so the monitor's
/// adaptive pacing can be tested with a fixed value.
pub trait CpuProbe: Send + Sync {
    /// Global CPU utilization in percent (0.0-100.0).
    fn cpu_percent(&self) -> f32;
}
