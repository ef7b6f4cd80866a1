use thiserror::Error;

use crate::capture::domain::device_selector::DeviceSelector;
use crate::shared::frame::Frame;

/// Why a real source could not be acquired. Never fatal for a session
/// that allows fallback: the synthetic source is substituted instead.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("permission denied for {0}")]
    PermissionDenied(String),
    #[error("no device available: {0}")]
    NoDevice(String),
    #[error("synthetic source requested")]
    FallbackRequested,
    #[error("failed to open {selector}: {reason}")]
    Open { selector: String, reason: String },
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame available")]
    NoFrame,
    /// The source is gone for good (device unplugged, stream ended).
    #[error("source disconnected: {0}")]
    Disconnected(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// A live video source polled by the detection loop.
///
/// Real cameras, files and the synthetic generator all satisfy this
/// contract, so the loop never knows which one it is reading from.
pub trait FrameSource: Send {
    /// True when a frame newer than the last captured one is available.
    fn has_fresh_frame(&mut self) -> bool;

    /// Takes the freshest frame.
    fn capture_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Releases any device handles or decoder threads. Idempotent.
    fn release(&mut self);
}

/// Resolves a [`DeviceSelector`] to an opened [`FrameSource`].
pub trait SourceProvider: Send + Sync {
    fn acquire(&self, selector: &DeviceSelector) -> Result<Box<dyn FrameSource>, AcquisitionError>;
}
