pub mod default_source_provider;
pub mod ffmpeg_frame_source;
pub mod image_sequence_source;
pub mod synthetic_frame_source;
