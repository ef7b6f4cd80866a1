use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::recognition::domain::face_recognizer::{
    FaceRecognizer, RecognitionError, RecognitionOutcome,
};
use crate::shared::frame::Frame;
use crate::tracking::domain::tracked_face::TrackId;

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

pub struct RecognitionRequest {
    pub track_id: TrackId,
    pub issued_at: Duration,
    pub crop: Frame,
    /// The submitting session's liveness flag, captured at submission.
    pub active: Arc<AtomicBool>,
}

pub struct RecognitionReply {
    pub track_id: TrackId,
    pub issued_at: Duration,
    /// Returned so the session can attach it to a logged event.
    pub crop: Frame,
    pub result: Result<Option<RecognitionOutcome>, RecognitionError>,
}

/// Fixed set of worker threads running recognition off the detection loop.
///
/// Layout: `session → bounded queue → N workers → reply channel → session`
///
/// Submission never blocks: a full queue is reported as
/// [`RecognitionError::QueueFull`]. Requests whose session has gone
/// inactive are dropped both before and after the recognizer call.
pub struct RecognitionPool {
    requests: Option<Sender<RecognitionRequest>>,
    workers: Vec<JoinHandle<()>>,
}

impl RecognitionPool {
    pub fn spawn(
        recognizer: Arc<dyn FaceRecognizer>,
        workers: usize,
        queue_capacity: usize,
    ) -> (Self, Receiver<RecognitionReply>) {
        let (request_tx, request_rx) =
            crossbeam_channel::bounded::<RecognitionRequest>(queue_capacity.max(1));
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded::<RecognitionReply>();

        let handles = (0..workers.max(1))
            .map(|_| spawn_worker(recognizer.clone(), request_rx.clone(), reply_tx.clone()))
            .collect();

        (
            Self {
                requests: Some(request_tx),
                workers: handles,
            },
            reply_rx,
        )
    }

    pub fn submit(&self, request: RecognitionRequest) -> Result<(), RecognitionError> {
        let requests = self.requests.as_ref().ok_or(RecognitionError::PoolClosed)?;
        requests.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => RecognitionError::QueueFull,
            TrySendError::Disconnected(_) => RecognitionError::PoolClosed,
        })
    }

    /// Stops accepting work. Workers finish their current call and exit;
    /// a worker stuck in a slow call is detached rather than awaited.
    pub fn shutdown(&mut self) {
        self.requests.take();
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for RecognitionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(
    recognizer: Arc<dyn FaceRecognizer>,
    request_rx: Receiver<RecognitionRequest>,
    reply_tx: Sender<RecognitionReply>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for request in request_rx {
            if !request.active.load(Ordering::Relaxed) {
                continue;
            }
            let result = recognizer.recognize(&request.crop);
            if !request.active.load(Ordering::Relaxed) {
                log::debug!("Dropping recognition result for stopped session");
                continue;
            }
            let reply = RecognitionReply {
                track_id: request.track_id,
                issued_at: request.issued_at,
                crop: request.crop,
                result,
            };
            if reply_tx.send(reply).is_err() {
                break;
            }
        }
    })
}
