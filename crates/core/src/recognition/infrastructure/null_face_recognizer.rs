use crate::recognition::domain::face_recognizer::{
    FaceRecognizer, RecognitionError, RecognitionOutcome,
};
use crate::shared::frame::Frame;

/// Recognizer used when no identification backend is configured.
/// Every face resolves to unknown.
pub struct NullFaceRecognizer;

impl FaceRecognizer for NullFaceRecognizer {
    fn recognize(&self, _face: &Frame) -> Result<Option<RecognitionOutcome>, RecognitionError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_matches() {
        let face = Frame::new(vec![0u8; 12], 2, 2, 3, 0);
        assert!(NullFaceRecognizer.recognize(&face).unwrap().is_none());
    }
}
