pub mod device_selector;
pub mod frame_source;
