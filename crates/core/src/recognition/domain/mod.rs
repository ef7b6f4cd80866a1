pub mod face_crop;
pub mod face_recognizer;
pub mod recognition_throttler;
