use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::detection::domain::face_detector::{DetectionError, FaceDetector, RawDetection};
use crate::shared::frame::Frame;

/// How often the worker re-checks readiness while idle.
const READY_POLL: Duration = Duration::from_millis(100);

struct Request {
    seq: u64,
    frame: Frame,
}

struct Reply {
    seq: u64,
    result: Result<Vec<RawDetection>, DetectionError>,
}

/// Decorator that bounds every detection call by a caller-side timeout.
///
/// The wrapped detector lives on its own worker thread. A call that
/// overruns returns [`DetectionError::Timeout`]; its eventual reply is
/// discarded, and until it arrives further calls fail fast with
/// [`DetectionError::Busy`] instead of queueing behind it.
pub struct TimeoutFaceDetector {
    requests: Option<Sender<Request>>,
    replies: Receiver<Reply>,
    ready: Arc<AtomicBool>,
    timeout: Duration,
    next_seq: u64,
    outstanding: Option<u64>,
}

impl TimeoutFaceDetector {
    pub fn new(inner: Box<dyn FaceDetector>, timeout: Duration) -> Self {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<Request>();
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded::<Reply>();
        let ready = Arc::new(AtomicBool::new(false));

        {
            let ready = ready.clone();
            thread::spawn(move || run_worker(inner, request_rx, reply_tx, ready));
        }

        Self {
            requests: Some(request_tx),
            replies: reply_rx,
            ready,
            timeout,
            next_seq: 0,
            outstanding: None,
        }
    }

    /// Drops the reply of a previously timed-out call if it has arrived.
    fn drain_outstanding(&mut self) {
        while let Some(seq) = self.outstanding {
            match self.replies.try_recv() {
                Ok(reply) if reply.seq == seq => {
                    log::debug!("Discarding late detection result #{seq}");
                    self.outstanding = None;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }
}

fn run_worker(
    mut inner: Box<dyn FaceDetector>,
    requests: Receiver<Request>,
    replies: Sender<Reply>,
    ready: Arc<AtomicBool>,
) {
    ready.store(inner.is_ready(), Ordering::Relaxed);
    loop {
        match requests.recv_timeout(READY_POLL) {
            Ok(request) => {
                let result = inner.detect(&request.frame);
                ready.store(inner.is_ready(), Ordering::Relaxed);
                if replies
                    .send(Reply {
                        seq: request.seq,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                ready.store(inner.is_ready(), Ordering::Relaxed);
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("Detection worker exiting");
}

impl FaceDetector for TimeoutFaceDetector {
    fn is_ready(&mut self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError> {
        self.drain_outstanding();
        if self.outstanding.is_some() {
            return Err(DetectionError::Busy);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let requests = self.requests.as_ref().ok_or(DetectionError::WorkerStopped)?;
        requests
            .send(Request {
                seq,
                frame: frame.clone(),
            })
            .map_err(|_| DetectionError::WorkerStopped)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.seq == seq => return reply.result,
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    self.outstanding = Some(seq);
                    return Err(DetectionError::Timeout(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(DetectionError::WorkerStopped),
            }
        }
    }
}

impl Drop for TimeoutFaceDetector {
    fn drop(&mut self) {
        // Closing the request channel stops the worker once any running
        // call returns.
        self.requests.take();
    }
}
