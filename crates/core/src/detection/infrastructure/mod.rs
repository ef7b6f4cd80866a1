pub mod onnx_face_detector;
pub mod timeout_face_detector;
