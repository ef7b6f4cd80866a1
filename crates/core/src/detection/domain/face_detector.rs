use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
}

/// One face reported by a detector for a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    /// Eyes, nose tip and mouth corners in frame coordinates.
    pub landmarks: Option<[(f64, f64); 5]>,
    pub age: Option<f32>,
    pub gender: Option<Gender>,
}

impl RawDetection {
    pub fn new(bounding_box: BoundingBox, confidence: f64) -> Self {
        Self {
            bounding_box,
            confidence,
            landmarks: None,
            age: None,
            gender: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum DetectionError {
    /// The backend is still loading; the caller should back off and retry.
    #[error("detection model not ready")]
    ModelNotReady,
    #[error("detection timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// A previous call that timed out is still running on the backend.
    #[error("detector busy with a previous frame")]
    Busy,
    #[error("detection backend failed: {0}")]
    Backend(String),
    #[error("detection worker stopped")]
    WorkerStopped,
}

/// Domain interface for face detection.
///
/// Implementations may be stateful (lazy model loading, worker
/// threads), hence `&mut self`.
pub trait FaceDetector: Send {
    /// False while the backend is warming up.
    fn is_ready(&mut self) -> bool;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError>;
}
