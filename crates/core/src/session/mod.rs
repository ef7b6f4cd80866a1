pub mod activity_log;
pub mod session_config;
pub mod session_logger;
pub mod session_manager;
pub mod stream_session;
