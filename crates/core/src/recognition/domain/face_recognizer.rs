use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::shared::frame::Frame;

/// Backends report person ids either as JSON numbers or strings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PersonId {
    Number(i64),
    Text(String),
}

impl PersonId {
    /// Zero, negative and blank ids mean "no person".
    pub fn is_valid(&self) -> bool {
        match self {
            PersonId::Number(n) => *n > 0,
            PersonId::Text(s) => !s.trim().is_empty(),
        }
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonId::Number(n) => write!(f, "{n}"),
            PersonId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PersonId {
    fn from(id: &str) -> Self {
        PersonId::Text(id.to_string())
    }
}

impl From<String> for PersonId {
    fn from(id: String) -> Self {
        PersonId::Text(id)
    }
}

impl From<i64> for PersonId {
    fn from(id: i64) -> Self {
        PersonId::Number(id)
    }
}

/// Best match reported by a recognition backend.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionOutcome {
    #[serde(default)]
    pub person_id: Option<PersonId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl RecognitionOutcome {
    /// True when the backend positively identified a person.
    pub fn is_match(&self) -> bool {
        self.person_id.as_ref().is_some_and(PersonId::is_valid)
    }
}

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),
    #[error("recognition queue is full")]
    QueueFull,
    #[error("recognition pool is closed")]
    PoolClosed,
    #[error("recognition request failed: {0}")]
    Http(String),
    #[error("recognition backend failed: {0}")]
    Backend(String),
    #[error("invalid recognition response: {0}")]
    InvalidResponse(String),
}

/// Domain interface for identifying a cropped face.
///
/// `Ok(None)` means the backend found no match. Shared across worker
/// threads, hence `&self` and `Sync`.
pub trait FaceRecognizer: Send + Sync {
    fn recognize(&self, face: &Frame) -> Result<Option<RecognitionOutcome>, RecognitionError>;
}
