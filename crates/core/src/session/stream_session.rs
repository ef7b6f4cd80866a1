use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use thiserror::Error;

use crate::capture::domain::device_selector::DeviceSelector;
use crate::capture::domain::frame_source::{
    AcquisitionError, CaptureError, FrameSource, SourceProvider,
};
use crate::capture::infrastructure::synthetic_frame_source::SyntheticFrameSource;
use crate::detection::domain::face_detector::{DetectionError, FaceDetector};
use crate::detection::infrastructure::timeout_face_detector::TimeoutFaceDetector;
use crate::quality::quality_assessor::{self, QualityAssessment};
use crate::recognition::domain::face_crop::crop_face;
use crate::recognition::domain::face_recognizer::FaceRecognizer;
use crate::recognition::domain::recognition_throttler::{MergeOutcome, RecognitionThrottler};
use crate::recognition::infrastructure::recognition_pool::{
    RecognitionPool, RecognitionReply, RecognitionRequest,
};
use crate::session::activity_log::{ActivityLog, DetectionEvent};
use crate::session::session_config::TrackingConfig;
use crate::session::session_logger::{NullSessionLogger, SessionLogger};
use crate::shared::clock::Clock;
use crate::shared::frame::Frame;
use crate::tracking::domain::identity_tracker::IdentityTracker;
use crate::tracking::domain::tracked_face::{TrackId, TrackedFace};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Real,
    Fallback,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    /// The detector was lost when a previous loop thread panicked.
    #[error("detector unavailable after loop failure")]
    DetectorLost,
}

/// Consumer-facing view of one stream, republished by the loop after
/// every iteration and every merged recognition result.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub stream_id: String,
    pub state: SessionState,
    pub uses_fallback_source: bool,
    pub selected_device: Option<String>,
    /// Live tracks ordered by id.
    pub tracks: Vec<TrackedFace>,
    pub quality: Option<QualityAssessment>,
    pub empty_frame_streak: u32,
}

impl StreamSnapshot {
    fn idle(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            state: SessionState::Idle,
            uses_fallback_source: false,
            selected_device: None,
            tracks: Vec::new(),
            quality: None,
            empty_frame_streak: 0,
        }
    }
}

/// Collaborators shared by every session of a manager.
#[derive(Clone)]
pub struct SessionContext {
    pub provider: Arc<dyn SourceProvider>,
    pub recognizer: Arc<dyn FaceRecognizer>,
    pub activity: Arc<ActivityLog>,
    pub clock: Arc<dyn Clock>,
    pub recognition_workers: usize,
    pub recognition_queue: usize,
}

/// Owned pieces handed to the loop thread and returned when it exits.
struct LoopParts {
    detector: Box<dyn FaceDetector>,
    logger: Box<dyn SessionLogger>,
}

struct RunningLoop {
    stop_tx: Sender<()>,
    active: Arc<AtomicBool>,
    handle: JoinHandle<LoopParts>,
}

/// One video source and its detection loop.
///
/// `start` acquires a source (or the synthetic fallback) and spawns the
/// loop thread; `stop` cancels the pending reschedule, waits for the
/// current iteration, releases the source and clears all tracks.
pub struct StreamSession {
    id: String,
    config: TrackingConfig,
    context: SessionContext,
    parts: Option<LoopParts>,
    snapshot: Arc<Mutex<StreamSnapshot>>,
    running: Option<RunningLoop>,
}

impl StreamSession {
    /// Detection calls are bounded by `config.detection_timeout_ms`.
    pub fn new(
        id: impl Into<String>,
        config: TrackingConfig,
        context: SessionContext,
        detector: Box<dyn FaceDetector>,
    ) -> Self {
        let id = id.into();
        let detector = Box::new(TimeoutFaceDetector::new(detector, config.detection_timeout()));
        Self {
            snapshot: Arc::new(Mutex::new(StreamSnapshot::idle(&id))),
            id,
            config,
            context,
            parts: Some(LoopParts {
                detector,
                logger: Box::new(NullSessionLogger),
            }),
            running: None,
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn SessionLogger>) -> Self {
        if let Some(parts) = self.parts.as_mut() {
            parts.logger = logger;
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.lock_snapshot().state
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.lock_snapshot().clone()
    }

    /// Acquires a source and starts the detection loop.
    ///
    /// Falls back to the synthetic source when the real one cannot be
    /// opened and fallback is allowed; otherwise the session stays
    /// `Idle` and the acquisition error is returned. Starting an active
    /// session is a no-op.
    pub fn start(&mut self, selector: &DeviceSelector) -> Result<SourceKind, SessionError> {
        self.reap_finished_loop();
        if self.running.is_some() {
            let snapshot = self.snapshot();
            return Ok(if snapshot.uses_fallback_source {
                SourceKind::Fallback
            } else {
                SourceKind::Real
            });
        }

        self.set_state(SessionState::Starting);
        let (source, kind) = match self.acquire(selector) {
            Ok(acquired) => acquired,
            Err(e) => {
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        let Some(parts) = self.parts.take() else {
            self.set_state(SessionState::Idle);
            return Err(SessionError::DetectorLost);
        };

        let (pool, replies) = RecognitionPool::spawn(
            self.context.recognizer.clone(),
            self.context.recognition_workers,
            self.context.recognition_queue,
        );
        let active = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        {
            let mut snapshot = self.lock_snapshot();
            *snapshot = StreamSnapshot::idle(&self.id);
            snapshot.state = SessionState::Active;
            snapshot.uses_fallback_source = kind == SourceKind::Fallback;
            snapshot.selected_device = Some(selector.label());
        }

        let session_loop = SessionLoop {
            stream_id: self.id.clone(),
            config: self.config.clone(),
            source,
            source_kind: kind,
            detector: parts.detector,
            logger: parts.logger,
            tracker: IdentityTracker::new(self.config.iou_threshold, self.config.expiry()),
            throttler: RecognitionThrottler::new(
                self.config.recognition_cooldown(),
                self.config.log_cooldown(),
                self.config.recognition_timeout(),
            ),
            pool,
            replies,
            activity: self.context.activity.clone(),
            clock: self.context.clock.clone(),
            active: active.clone(),
            snapshot: self.snapshot.clone(),
            quality: None,
            last_quality_at: None,
            empty_frame_streak: 0,
        };
        let handle = std::thread::spawn(move || session_loop.run(stop_rx));

        log::info!(
            "[{}] started on {} ({:?} source)",
            self.id,
            selector.label(),
            kind
        );
        self.running = Some(RunningLoop {
            stop_tx,
            active,
            handle,
        });
        Ok(kind)
    }

    /// Stops the loop and releases everything it holds. Idempotent.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.set_state(SessionState::Stopping);
        running.active.store(false, Ordering::Relaxed);
        let _ = running.stop_tx.try_send(());
        self.join_loop(running.handle);
        *self.lock_snapshot() = StreamSnapshot::idle(&self.id);
        log::info!("[{}] stopped", self.id);
    }

    fn acquire(
        &self,
        selector: &DeviceSelector,
    ) -> Result<(Box<dyn FrameSource>, SourceKind), SessionError> {
        match self.context.provider.acquire(selector) {
            Ok(source) => Ok((source, SourceKind::Real)),
            // An explicit synthetic request is honoured even without fallback.
            Err(e)
                if self.config.allow_fallback
                    || matches!(e, AcquisitionError::FallbackRequested) =>
            {
                match e {
                    AcquisitionError::FallbackRequested => {}
                    ref other => log::warn!("[{}] {other}; using synthetic source", self.id),
                }
                Ok((
                    Box::new(SyntheticFrameSource::new(
                        self.config.fallback_width,
                        self.config.fallback_height,
                    )),
                    SourceKind::Fallback,
                ))
            }
            Err(e) => {
                log::error!("[{}] {e}", self.id);
                Err(e.into())
            }
        }
    }

    /// Collects the loop thread if it ended on its own (fatal source loss).
    fn reap_finished_loop(&mut self) {
        if self
            .running
            .as_ref()
            .is_some_and(|running| running.handle.is_finished())
        {
            if let Some(running) = self.running.take() {
                self.join_loop(running.handle);
            }
        }
    }

    fn join_loop(&mut self, handle: JoinHandle<LoopParts>) {
        match handle.join() {
            Ok(parts) => self.parts = Some(parts),
            Err(_) => log::error!("[{}] detection loop panicked", self.id),
        }
    }

    fn set_state(&self, state: SessionState) {
        self.lock_snapshot().state = state;
    }

    fn lock_snapshot(&self) -> std::sync::MutexGuard<'_, StreamSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Delay before the next iteration: the base interval (or the idle
/// interval once the empty streak passes the threshold) minus the time
/// this iteration already took, never below `min_delay`.
pub fn next_delay(config: &TrackingConfig, empty_frame_streak: u32, processing: Duration) -> Duration {
    let interval = if empty_frame_streak > config.idle_streak_threshold {
        config.idle_interval()
    } else {
        config.base_interval()
    };
    interval.saturating_sub(processing).max(config.min_delay())
}

enum Step {
    Continue(Duration),
    /// The source is gone and cannot be replaced.
    Finished,
}

enum WaitEvent {
    Stop,
    Reply(RecognitionReply),
    RepliesClosed,
    Elapsed,
}

/// State owned by the loop thread. Only this thread touches the tracks.
struct SessionLoop {
    stream_id: String,
    config: TrackingConfig,
    source: Box<dyn FrameSource>,
    source_kind: SourceKind,
    detector: Box<dyn FaceDetector>,
    logger: Box<dyn SessionLogger>,
    tracker: IdentityTracker,
    throttler: RecognitionThrottler,
    pool: RecognitionPool,
    replies: Receiver<RecognitionReply>,
    activity: Arc<ActivityLog>,
    clock: Arc<dyn Clock>,
    active: Arc<AtomicBool>,
    snapshot: Arc<Mutex<StreamSnapshot>>,
    quality: Option<QualityAssessment>,
    last_quality_at: Option<Duration>,
    empty_frame_streak: u32,
}

impl SessionLoop {
    fn run(mut self, stop_rx: Receiver<()>) -> LoopParts {
        while self.active.load(Ordering::Relaxed) {
            let delay = match self.step() {
                Step::Continue(delay) => delay,
                Step::Finished => {
                    log::error!("[{}] source lost; session going idle", self.stream_id);
                    break;
                }
            };
            self.publish();
            if !self.wait(&stop_rx, delay) {
                break;
            }
        }
        self.shutdown()
    }

    /// One loop iteration; returns the delay before the next one.
    fn step(&mut self) -> Step {
        let started = Instant::now();
        let now = self.clock.now();

        for id in self.throttler.expire_overdue(now) {
            log::warn!("[{}] recognition for {id} timed out", self.stream_id);
            self.activity.record_error();
        }

        if !self.detector.is_ready() {
            return Step::Continue(self.config.not_ready_delay());
        }
        if !self.source.has_fresh_frame() {
            return Step::Continue(self.config.no_frame_delay());
        }

        let frame = match self.source.capture_frame() {
            Ok(frame) => frame,
            Err(CaptureError::NoFrame) => return Step::Continue(self.config.no_frame_delay()),
            Err(CaptureError::Decode(reason)) => {
                log::warn!("[{}] frame decode failed: {reason}", self.stream_id);
                self.activity.record_error();
                return Step::Continue(self.config.no_frame_delay());
            }
            Err(CaptureError::Disconnected(reason)) => {
                self.activity.record_error();
                return self.replace_lost_source(&reason);
            }
        };
        self.logger.timing("capture", elapsed_ms(started));
        self.sample_quality(&frame, now);

        let detect_started = Instant::now();
        let detections = match self.detector.detect(&frame) {
            Ok(detections) => Some(
                detections
                    .into_iter()
                    .filter(|d| d.confidence >= self.config.min_confidence)
                    .collect::<Vec<_>>(),
            ),
            Err(DetectionError::ModelNotReady) => {
                return Step::Continue(self.config.not_ready_delay())
            }
            Err(e) => {
                log::warn!("[{}] {e}", self.stream_id);
                self.activity.record_error();
                None
            }
        };
        self.logger.timing("detect", elapsed_ms(detect_started));

        if let Some(detections) = detections {
            let track_started = Instant::now();
            let update = self.tracker.update(&detections, now);
            self.logger.timing("track", elapsed_ms(track_started));
            self.logger.metric("detections", detections.len() as f64);

            let dispatch_started = Instant::now();
            for id in update.observed() {
                self.dispatch_recognition(&frame, id, now);
            }
            self.logger.timing("dispatch", elapsed_ms(dispatch_started));
        }

        let swept = self.tracker.sweep(now);
        self.throttler.forget(&swept);

        if self.tracker.is_empty() {
            self.empty_frame_streak = self.empty_frame_streak.saturating_add(1);
        } else {
            self.empty_frame_streak = 0;
        }

        self.logger.metric("tracks", self.tracker.len() as f64);
        self.logger.cycle();
        Step::Continue(next_delay(
            &self.config,
            self.empty_frame_streak,
            started.elapsed(),
        ))
    }

    fn sample_quality(&mut self, frame: &Frame, now: Duration) {
        let due = self.last_quality_at.map_or(true, |at| {
            now.saturating_sub(at) >= self.config.quality_interval()
        });
        if due {
            self.quality = Some(quality_assessor::assess(frame));
            self.last_quality_at = Some(now);
        }
    }

    fn replace_lost_source(&mut self, reason: &str) -> Step {
        self.source.release();
        if !self.config.allow_fallback || self.source_kind == SourceKind::Fallback {
            log::error!("[{}] source disconnected: {reason}", self.stream_id);
            return Step::Finished;
        }
        log::warn!(
            "[{}] source disconnected ({reason}); switching to synthetic source",
            self.stream_id
        );
        self.source = Box::new(SyntheticFrameSource::new(
            self.config.fallback_width,
            self.config.fallback_height,
        ));
        self.source_kind = SourceKind::Fallback;
        self.logger.info("switched to synthetic source");
        Step::Continue(self.config.min_delay())
    }

    /// Fire-and-forget: the crop is queued and the loop moves on.
    fn dispatch_recognition(&mut self, frame: &Frame, id: TrackId, now: Duration) {
        let Some(track) = self.tracker.get_mut(id) else {
            return;
        };
        if !self.throttler.is_due(track, now) {
            return;
        }
        let crop = match crop_face(
            frame,
            &track.bounding_box,
            self.config.crop_padding,
            self.config.crop_max_dimension,
        ) {
            Ok(crop) => crop,
            Err(e) => {
                log::debug!("[{}] skipping recognition for {id}: {e}", self.stream_id);
                return;
            }
        };

        let issued_at = self.throttler.begin(track, now);
        let request = RecognitionRequest {
            track_id: id,
            issued_at,
            crop,
            active: self.active.clone(),
        };
        if let Err(e) = self.pool.submit(request) {
            log::warn!("[{}] recognition for {id} not sent: {e}", self.stream_id);
            self.throttler.abandon(id);
            self.activity.record_error();
        }
    }

    fn apply_reply(&mut self, reply: RecognitionReply) {
        let now = self.clock.now();
        let RecognitionReply {
            track_id,
            issued_at,
            crop,
            result,
        } = reply;

        match self
            .throttler
            .complete(&mut self.tracker, track_id, issued_at, result, now)
        {
            MergeOutcome::Discarded => {}
            MergeOutcome::Failed(e) => {
                log::warn!("[{}] recognition for {track_id} failed: {e}", self.stream_id);
                self.activity.record_error();
            }
            MergeOutcome::Merged {
                identity,
                confidence,
                log,
            } => {
                if log {
                    log::info!(
                        "[{}] {track_id} is {} ({confidence:.2})",
                        self.stream_id,
                        identity.name
                    );
                    self.activity.record_event(DetectionEvent {
                        track_id,
                        stream_id: self.stream_id.clone(),
                        timestamp: now,
                        snapshot: Arc::new(crop),
                        identity: Some(identity),
                        confidence,
                    });
                }
            }
        }
    }

    /// Sleeps until `delay` elapses, merging recognition replies as they
    /// arrive. Returns false when the session was told to stop.
    fn wait(&mut self, stop_rx: &Receiver<()>, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = crossbeam_channel::select! {
                recv(stop_rx) -> _ => WaitEvent::Stop,
                recv(self.replies) -> msg => match msg {
                    Ok(reply) => WaitEvent::Reply(reply),
                    Err(_) => WaitEvent::RepliesClosed,
                },
                default(remaining) => WaitEvent::Elapsed,
            };
            match event {
                WaitEvent::Stop => return false,
                WaitEvent::Elapsed => return true,
                WaitEvent::Reply(reply) => {
                    self.apply_reply(reply);
                    self.publish();
                }
                WaitEvent::RepliesClosed => {
                    return matches!(
                        stop_rx.recv_timeout(remaining),
                        Err(RecvTimeoutError::Timeout)
                    );
                }
            }
        }
    }

    fn publish(&self) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        snapshot.uses_fallback_source = self.source_kind == SourceKind::Fallback;
        snapshot.tracks = self.tracker.tracks().cloned().collect();
        snapshot.quality = self.quality.clone();
        snapshot.empty_frame_streak = self.empty_frame_streak;
    }

    fn shutdown(mut self) -> LoopParts {
        self.active.store(false, Ordering::Relaxed);
        self.pool.shutdown();
        self.source.release();
        self.tracker.clear();
        self.throttler.clear();
        self.logger.summary();
        {
            let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            snapshot.state = SessionState::Idle;
            snapshot.tracks.clear();
        }
        LoopParts {
            detector: self.detector,
            logger: self.logger,
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
