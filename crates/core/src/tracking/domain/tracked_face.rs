use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::detection::domain::face_detector::{Gender, RawDetection};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::constants::UNKNOWN_NAME;

/// Stable per-stream track identifier. Never reused within a tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct FaceAttributes {
    pub gender: Option<Gender>,
    pub age: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceIdentity {
    /// Absent for an unmatched face.
    pub person_id: Option<String>,
    pub name: String,
}

impl FaceIdentity {
    pub fn known(person_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            person_id: Some(person_id.into()),
            name: name.into(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            person_id: None,
            name: UNKNOWN_NAME.to_string(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.person_id.is_some()
    }
}

/// One face followed across frames within a single stream.
///
/// Timestamps are [`Clock`](crate::shared::clock::Clock) readings.
/// `None` for `last_recognized_at`/`last_logged_at` means "never".
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedFace {
    pub id: TrackId,
    pub bounding_box: BoundingBox,
    pub last_seen_at: Duration,
    pub last_recognized_at: Option<Duration>,
    pub last_logged_at: Option<Duration>,
    /// Detector confidence, replaced by the recognition confidence once
    /// a match is merged.
    pub confidence: f64,
    pub attributes: FaceAttributes,
    pub identity: Option<FaceIdentity>,
    pub recognized: bool,
}

impl TrackedFace {
    pub fn new(id: TrackId, detection: &RawDetection, now: Duration) -> Self {
        Self {
            id,
            bounding_box: detection.bounding_box,
            last_seen_at: now,
            last_recognized_at: None,
            last_logged_at: None,
            confidence: detection.confidence,
            attributes: FaceAttributes {
                gender: detection.gender,
                age: detection.age,
            },
            identity: None,
            recognized: false,
        }
    }

    /// Applies a matching detection; attributes the detector did not
    /// supply this time are kept from earlier frames.
    pub fn observe(&mut self, detection: &RawDetection, now: Duration) {
        self.bounding_box = detection.bounding_box;
        self.confidence = detection.confidence;
        self.last_seen_at = now;
        if detection.gender.is_some() {
            self.attributes.gender = detection.gender;
        }
        if detection.age.is_some() {
            self.attributes.age = detection.age;
        }
    }

    pub fn display_name(&self) -> &str {
        self.identity
            .as_ref()
            .map_or(UNKNOWN_NAME, |identity| identity.name.as_str())
    }
}
