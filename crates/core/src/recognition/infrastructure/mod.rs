pub mod embedding_face_recognizer;
pub mod http_face_recognizer;
pub mod null_face_recognizer;
pub mod recognition_pool;
