use std::sync::Arc;

use thiserror::Error;

use crate::capture::domain::device_selector::DeviceSelector;
use crate::capture::domain::frame_source::SourceProvider;
use crate::detection::domain::face_detector::FaceDetector;
use crate::recognition::domain::face_recognizer::FaceRecognizer;
use crate::session::activity_log::{ActivityLog, DetectionEvent, SessionStats};
use crate::session::session_config::{ConfigError, ManagerConfig, TrackingConfig};
use crate::session::session_logger::LogSessionLogger;
use crate::session::stream_session::{
    SessionContext, SessionError, SourceKind, StreamSession, StreamSnapshot,
};
use crate::shared::clock::Clock;

/// Cycles between periodic debug lines from each session's logger.
pub const DEFAULT_REPORT_EVERY: u64 = 50;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("unknown stream '{0}'")]
    UnknownStream(String),
    #[error("stream '{0}' is already registered")]
    DuplicateStream(String),
    #[error("stream '{id}': {source}")]
    Session {
        id: String,
        #[source]
        source: SessionError,
    },
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

struct ManagedStream {
    selector: DeviceSelector,
    session: StreamSession,
}

/// Owns every stream session and the activity log they share.
///
/// Streams are kept in registration order; fan-out operations visit
/// them in that order and never stop at the first failure.
pub struct SessionManager {
    context: SessionContext,
    streams: Vec<ManagedStream>,
    report_every: u64,
}

impl SessionManager {
    pub fn new(
        config: &ManagerConfig,
        provider: Arc<dyn SourceProvider>,
        recognizer: Arc<dyn FaceRecognizer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        Ok(Self {
            context: SessionContext {
                provider,
                recognizer,
                activity: Arc::new(ActivityLog::new(config.event_capacity)),
                clock,
                recognition_workers: config.recognition_workers,
                recognition_queue: config.recognition_queue,
            },
            streams: Vec::new(),
            report_every: DEFAULT_REPORT_EVERY,
        })
    }

    pub fn with_report_every(mut self, report_every: u64) -> Self {
        self.report_every = report_every;
        self
    }

    /// Registers a stream. It stays idle until started.
    pub fn add_stream(
        &mut self,
        id: impl Into<String>,
        selector: DeviceSelector,
        detector: Box<dyn FaceDetector>,
        config: TrackingConfig,
    ) -> Result<(), ManagerError> {
        let id = id.into();
        if self.find(&id).is_some() {
            return Err(ManagerError::DuplicateStream(id));
        }
        config.validate()?;

        let logger = LogSessionLogger::new(id.clone(), self.report_every);
        let session = StreamSession::new(id, config, self.context.clone(), detector)
            .with_logger(Box::new(logger));
        self.streams.push(ManagedStream { selector, session });
        Ok(())
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.streams
            .iter()
            .map(|s| s.session.id().to_string())
            .collect()
    }

    /// Starts every stream; one stream failing does not keep the
    /// others from starting.
    pub fn start_all(&mut self) -> Vec<(String, Result<SourceKind, ManagerError>)> {
        self.streams
            .iter_mut()
            .map(|stream| {
                let id = stream.session.id().to_string();
                let result = Self::start_stream(stream);
                (id, result)
            })
            .collect()
    }

    pub fn stop_all(&mut self) {
        for stream in &mut self.streams {
            stream.session.stop();
        }
    }

    pub fn start(&mut self, id: &str) -> Result<SourceKind, ManagerError> {
        let stream = self
            .find_mut(id)
            .ok_or_else(|| ManagerError::UnknownStream(id.to_string()))?;
        Self::start_stream(stream)
    }

    pub fn stop(&mut self, id: &str) -> Result<(), ManagerError> {
        let stream = self
            .find_mut(id)
            .ok_or_else(|| ManagerError::UnknownStream(id.to_string()))?;
        stream.session.stop();
        Ok(())
    }

    /// Counters aggregated across every stream.
    pub fn stats(&self) -> SessionStats {
        self.context.activity.stats()
    }

    /// Logged events, most recent first.
    pub fn recent_events(&self, limit: usize) -> Vec<DetectionEvent> {
        self.context.activity.recent(limit)
    }

    /// Empties the event log and zeroes the counters together.
    pub fn clear_events(&self) {
        self.context.activity.clear();
    }

    pub fn snapshots(&self) -> Vec<StreamSnapshot> {
        self.streams.iter().map(|s| s.session.snapshot()).collect()
    }

    pub fn snapshot(&self, id: &str) -> Result<StreamSnapshot, ManagerError> {
        self.find(id)
            .map(|s| s.session.snapshot())
            .ok_or_else(|| ManagerError::UnknownStream(id.to_string()))
    }

    fn start_stream(stream: &mut ManagedStream) -> Result<SourceKind, ManagerError> {
        stream
            .session
            .start(&stream.selector)
            .map_err(|source| ManagerError::Session {
                id: stream.session.id().to_string(),
                source,
            })
    }

    fn find(&self, id: &str) -> Option<&ManagedStream> {
        self.streams.iter().find(|s| s.session.id() == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut ManagedStream> {
        self.streams.iter_mut().find(|s| s.session.id() == id)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
